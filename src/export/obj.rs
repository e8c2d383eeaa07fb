//! Wavefront OBJ export.
//!
//! Each layer becomes its own object with a flat diffuse material in the
//! layer's color, so slicers and viewers can pick layers apart.

use crate::error::Result;
use crate::mesher::StackModel;
use crate::types::color::to_hex;
use std::fmt::Write;

/// OBJ and MTL documents for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjExport {
    pub obj: String,
    pub mtl: String,
}

/// Export a model to OBJ format. `name` is used for the `mtllib` reference,
/// so the MTL file should be written as `{name}.mtl`.
pub fn export_obj(model: &StackModel, name: &str) -> Result<ObjExport> {
    let total_verts = model.total_vertices();
    let total_tris = model.total_triangles();

    // ~40 bytes per vertex line and ~30 per face
    let mut obj = String::with_capacity(256 + total_verts * 40 + total_tris * 30);
    let mut mtl = String::with_capacity(128 + model.layers.len() * 160);

    writeln!(obj, "# Pixel Stack Mesher OBJ Export")?;
    writeln!(obj, "# Vertices: {}", total_verts)?;
    writeln!(obj, "# Triangles: {}", total_tris)?;
    writeln!(obj, "# Grid step: {}, cell size: {} mm", model.step, model.pixel_size_mm)?;
    writeln!(obj)?;
    writeln!(obj, "mtllib {}.mtl", name)?;

    writeln!(mtl, "# Pixel Stack Mesher Material")?;

    // OBJ indices are global and 1-based.
    let mut vertex_offset: usize = 1;
    for layer in &model.layers {
        let material = format!("layer_{}", layer.layer_index);

        writeln!(obj)?;
        writeln!(obj, "o {}_{}", name, material)?;
        for p in layer.mesh.positions.chunks_exact(3) {
            writeln!(obj, "v {} {} {}", p[0], p[1], p[2])?;
        }
        writeln!(obj, "usemtl {}", material)?;
        for [a, b, c] in layer.mesh.triangles() {
            writeln!(
                obj,
                "f {} {} {}",
                a as usize + vertex_offset,
                b as usize + vertex_offset,
                c as usize + vertex_offset
            )?;
        }
        vertex_offset += layer.mesh.vertex_count();

        let [r, g, b] = layer.color.map(|c| c as f32 / 255.0);
        writeln!(mtl)?;
        writeln!(mtl, "# {} (swatch {})", to_hex(layer.color), layer.swatch_index)?;
        writeln!(mtl, "newmtl {}", material)?;
        writeln!(mtl, "Ka 0.0 0.0 0.0")?;
        writeln!(mtl, "Kd {:.4} {:.4} {:.4}", r, g, b)?;
        writeln!(mtl, "Ks 0.0 0.0 0.0")?;
        writeln!(mtl, "d 1.0")?;
        writeln!(mtl, "illum 1")?;
    }

    Ok(ObjExport { obj, mtl })
}
