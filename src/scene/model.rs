use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use nalgebra::vector;
use obj::raw::object::Polygon;
use obj::raw::parse_obj;
use thiserror::Error;

use crate::image::{Color, Image};
use crate::util::{Vector2f, Vector3f};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Obj(#[from] obj::ObjError),
    #[error("Face {face} refers to vertex {index}, but only {len} are defined")]
    VertexOutOfRange { face: usize, index: usize, len: usize },
}

/// Indices of one face corner into the position, uv and normal lists. Missing components are None.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceVertex {
    pub position: usize,
    pub uv: Option<usize>,
    pub normal: Option<usize>,
}

/// Triangle mesh with its textures. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Model {
    verts: Vec<Vector3f>,
    normals: Vec<Vector3f>,
    uvs: Vec<Vector2f>,
    faces: Vec<[FaceVertex; 3]>,
    diffuse_map: Image,
    normal_map: Image,
    specular_map: Image,
    subsurface_map: Image,
}

impl Default for Model {
    fn default() -> Self {
        return Model {
            verts: Vec::new(),
            normals: Vec::new(),
            uvs: Vec::new(),
            faces: Vec::new(),
            diffuse_map: Image::empty(),
            normal_map: Image::empty(),
            specular_map: Image::empty(),
            subsurface_map: Image::empty(),
        };
    }
}

impl Model {
    /// Loads the mesh and its `_diffuse`, `_nm`, `_spec` and `_SSS` companion textures.
    /// Never fails: an unreadable mesh becomes an empty model and missing textures stay blank.
    pub fn load<P: AsRef<Path>>(path: P) -> Model {
        let path = path.as_ref();
        let mut model = match File::open(path)
            .map_err(ModelError::from)
            .and_then(|file| Model::parse(BufReader::new(file)))
        {
            Ok(model) => model,
            Err(err) => {
                log::warn!("Could not load model {}: {}", path.display(), err);
                return Model::default();
            }
        };
        log::info!(
            "Loaded {} - {} vertices, {} faces",
            path.display(),
            model.nverts(),
            model.nfaces()
        );

        model.diffuse_map = load_texture(path, "_diffuse.tga");
        model.normal_map = load_texture(path, "_nm.tga");
        model.specular_map = load_texture(path, "_spec.tga");
        model.subsurface_map = load_texture(path, "_SSS.tga");
        return model;
    }

    /// Builds the model from the positions, texture coordinates, normals and faces of a Wavefront
    /// mesh. Faces that are not triangles are skipped, a face pointing past the vertex list is an error.
    pub fn parse<R: BufRead>(reader: R) -> Result<Model, ModelError> {
        let raw = parse_obj(reader)?;
        let mut model = Model {
            verts: raw.positions.iter().map(|&(x, y, z, _)| vector![x as f64, y as f64, z as f64]).collect(),
            normals: raw.normals.iter().map(|&(x, y, z)| vector![x as f64, y as f64, z as f64]).collect(),
            uvs: raw.tex_coords.iter().map(|&(u, v, _)| vector![u as f64, v as f64]).collect(),
            ..Model::default()
        };

        for (iface, polygon) in raw.polygons.iter().enumerate() {
            let corners = face_vertices(polygon);
            if let Some(corner) = corners.iter().find(|corner| corner.position >= model.verts.len()) {
                return Err(ModelError::VertexOutOfRange {
                    face: iface,
                    index: corner.position,
                    len: model.verts.len(),
                });
            }
            match <[FaceVertex; 3]>::try_from(corners) {
                Ok(face) => model.faces.push(face),
                Err(corners) => log::warn!(
                    "Skipping face {} with {} vertices, only triangles are supported",
                    iface,
                    corners.len()
                ),
            }
        }

        return Ok(model);
    }

    pub fn nverts(&self) -> usize {
        return self.verts.len();
    }

    pub fn nfaces(&self) -> usize {
        return self.faces.len();
    }

    /// Position indices of a face.
    pub fn face(&self, iface: usize) -> [usize; 3] {
        let face = &self.faces[iface];
        return [face[0].position, face[1].position, face[2].position];
    }

    pub fn vert(&self, index: usize) -> Vector3f {
        return self.verts[index];
    }

    pub fn face_vert(&self, iface: usize, nthvert: usize) -> Vector3f {
        return self.verts[self.faces[iface][nthvert].position];
    }

    /// Normalized vertex normal, zero vector if the face has none.
    pub fn norm(&self, iface: usize, nthvert: usize) -> Vector3f {
        return self.faces[iface][nthvert]
            .normal
            .and_then(|index| self.normals.get(index))
            .and_then(|normal| normal.try_normalize(f64::EPSILON))
            .unwrap_or_else(Vector3f::zeros);
    }

    /// Texture coordinate, zero if the face has none.
    pub fn uv(&self, iface: usize, nthvert: usize) -> Vector2f {
        return self.faces[iface][nthvert]
            .uv
            .and_then(|index| self.uvs.get(index).copied())
            .unwrap_or_else(Vector2f::zeros);
    }

    pub fn diffuse(&self, uv: Vector2f) -> Color {
        return sample(&self.diffuse_map, uv);
    }

    /// Normal packed into the r, g, b channels of the normal map.
    pub fn normal_map(&self, uv: Vector2f) -> Vector3f {
        let color = sample(&self.normal_map, uv);
        return vector![
            (128.0 - color.r() as f64) / 128.0,
            (128.0 - color.g() as f64) / 128.0,
            (color.b() as f64 - 128.0) / -128.0
        ];
    }

    /// Specular exponent, stored in the first channel.
    pub fn specular(&self, uv: Vector2f) -> f64 {
        return sample(&self.specular_map, uv).bgra[0] as f64;
    }

    pub fn subsurface(&self, uv: Vector2f) -> Color {
        return sample(&self.subsurface_map, uv);
    }

    pub fn set_diffuse_map(&mut self, image: Image) {
        self.diffuse_map = image;
    }

    pub fn set_normal_map(&mut self, image: Image) {
        self.normal_map = image;
    }

    pub fn set_specular_map(&mut self, image: Image) {
        self.specular_map = image;
    }

    pub fn set_subsurface_map(&mut self, image: Image) {
        self.subsurface_map = image;
    }
}

/// Nearest texel lookup, uv in [0, 1] mapped onto the texture size by truncation.
fn sample(texture: &Image, uv: Vector2f) -> Color {
    return texture.get(
        (uv.x * texture.width() as f64) as i32,
        (uv.y * texture.height() as f64) as i32,
    );
}

/// Path of a companion texture: the mesh file name with its extension replaced by the suffix.
fn texture_path(path: &Path, suffix: &str) -> Option<PathBuf> {
    path.extension()?;
    let stem = path.file_stem()?.to_string_lossy();
    return Some(path.with_file_name(format!("{}{}", stem, suffix)));
}

fn load_texture(path: &Path, suffix: &str) -> Image {
    let texture_path = match texture_path(path, suffix) {
        Some(texture_path) => texture_path,
        None => return Image::empty(),
    };
    match Image::read_file(&texture_path) {
        Ok(mut texture) => {
            // Textures are addressed with v growing upwards.
            texture.flip_vertically();
            log::debug!("Loaded texture {}", texture_path.display());
            return texture;
        }
        Err(err) => {
            log::warn!("Texture {} left blank: {}", texture_path.display(), err);
            return Image::empty();
        }
    }
}

/// Corners of a parsed polygon, whichever of uv and normal indices it carries.
fn face_vertices(polygon: &Polygon) -> Vec<FaceVertex> {
    return match polygon {
        Polygon::P(corners) => corners
            .iter()
            .map(|&position| FaceVertex { position, uv: None, normal: None })
            .collect(),
        Polygon::PT(corners) => corners
            .iter()
            .map(|&(position, uv)| FaceVertex { position, uv: Some(uv), normal: None })
            .collect(),
        Polygon::PN(corners) => corners
            .iter()
            .map(|&(position, normal)| FaceVertex { position, uv: None, normal: Some(normal) })
            .collect(),
        Polygon::PTN(corners) => corners
            .iter()
            .map(|&(position, uv, normal)| FaceVertex { position, uv: Some(uv), normal: Some(normal) })
            .collect(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    use crate::image::Format;

    #[test]
    fn single_triangle_without_uvs_or_normals() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1/1/1 2/1/1 3/1/1\n";
        let model = Model::parse(Cursor::new(text)).unwrap();
        assert_eq!(model.nverts(), 3);
        assert_eq!(model.nfaces(), 1);
        assert_eq!(model.face(0), [0, 1, 2]);
        assert_eq!(model.face_vert(0, 1), vector![1.0, 0.0, 0.0]);
        // Dangling uv and normal indices read as zero.
        assert_eq!(model.uv(0, 0), Vector2f::zeros());
        assert_eq!(model.norm(0, 2), Vector3f::zeros());
    }

    #[test]
    fn parses_all_statements_and_ignores_the_rest() {
        let text = "# comment\no head\nv 1 2 3\nv 4 5 6\nv 7 8 9\n\
                    vt 0.25 0.75 0.0\nvn 0 0 2\ng group\ns off\n\
                    f 3/1/1 1/1/1 2/1/1\nusemtl skin\n";
        let model = Model::parse(Cursor::new(text)).unwrap();
        assert_eq!(model.nverts(), 3);
        assert_eq!(model.face(0), [2, 0, 1]);
        assert_eq!(model.vert(2), vector![7.0, 8.0, 9.0]);
        // v is kept as written, not flipped.
        assert_eq!(model.uv(0, 0), vector![0.25, 0.75]);
        assert_relative_eq!(model.norm(0, 1), vector![0.0, 0.0, 1.0]);
    }

    #[test]
    fn faces_with_missing_components() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 1 0 0\nf 1//1 2//1 3//1\nf 1 2 3\n";
        let model = Model::parse(Cursor::new(text)).unwrap();
        assert_eq!(model.nfaces(), 2);
        assert_relative_eq!(model.norm(0, 0), vector![1.0, 0.0, 0.0]);
        assert_eq!(model.norm(1, 0), Vector3f::zeros());
    }

    #[test]
    fn non_triangle_faces_are_skipped() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\nf 1 2 3 4\nf 1 2 3\n";
        let model = Model::parse(Cursor::new(text)).unwrap();
        assert_eq!(model.nfaces(), 1);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(matches!(Model::parse(Cursor::new("v 1 two 3\n")), Err(ModelError::Obj(_))));
    }

    #[test]
    fn face_past_vertex_list_is_an_error() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4\n";
        match Model::parse(Cursor::new(text)) {
            Err(ModelError::VertexOutOfRange { face, index, len }) => assert_eq!((face, index, len), (0, 3, 3)),
            other => panic!("expected an out of range vertex, got {:?}", other.map(|model| model.nfaces())),
        }
    }

    #[test]
    fn face_past_vertex_list_loads_empty_model() {
        let path = std::env::temp_dir().join(format!("tiny_rasterizer_bad_index_{}.obj", std::process::id()));
        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4\n").unwrap();
        let model = Model::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(model.nverts(), 0);
        assert_eq!(model.nfaces(), 0);
    }

    #[test]
    fn missing_file_loads_empty_model() {
        let model = Model::load("does/not/exist.obj");
        assert_eq!(model.nverts(), 0);
        assert_eq!(model.nfaces(), 0);
        assert!(model.diffuse(vector![0.5, 0.5]).is_black());
    }

    #[test]
    fn companion_texture_paths() {
        assert_eq!(
            texture_path(Path::new("obj/head.obj"), "_nm.tga"),
            Some(PathBuf::from("obj/head_nm.tga"))
        );
        assert_eq!(texture_path(Path::new("obj/head"), "_nm.tga"), None);
    }

    #[test]
    fn texture_sampling() {
        let mut model = Model::default();
        let mut diffuse = Image::new(2, 2, Format::Rgb);
        diffuse.set(1, 0, Color::rgb(10, 20, 30));
        model.set_diffuse_map(diffuse);
        assert_eq!(model.diffuse(vector![0.75, 0.25]).r(), 10);
        assert!(model.diffuse(vector![0.25, 0.25]).is_black());

        let mut specular = Image::new(1, 1, Format::Grayscale);
        specular.set(0, 0, Color::gray(12));
        model.set_specular_map(specular);
        assert_eq!(model.specular(vector![0.5, 0.5]), 12.0);

        let mut normals = Image::new(1, 1, Format::Rgb);
        normals.set(0, 0, Color::rgb(128, 128, 0));
        model.set_normal_map(normals);
        assert_relative_eq!(model.normal_map(vector![0.0, 0.0]), vector![0.0, 0.0, 1.0]);
    }

    #[test]
    fn loads_model_and_textures_from_disk() {
        let dir = std::env::temp_dir().join(format!("tiny_rasterizer_model_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mesh = dir.join("tri.obj");
        std::fs::write(&mesh, "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nf 1/1 2/1 3/1\n").unwrap();
        let mut diffuse = Image::new(2, 2, Format::Rgb);
        // Row 1 on disk becomes row 0 after the flip on load.
        diffuse.set(0, 1, Color::rgb(50, 60, 70));
        diffuse.write_tga_file(dir.join("tri_diffuse.tga"), true).unwrap();

        let model = Model::load(&mesh);
        assert_eq!(model.nfaces(), 1);
        assert_eq!(model.diffuse(model.uv(0, 0)), Color { bgra: [70, 60, 50, 0], bytespp: 3 });
        assert!(model.specular(vector![0.5, 0.5]) == 0.0);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
