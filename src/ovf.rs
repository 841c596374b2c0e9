// src/ovf.rs
//
// OOMMF OVF 2.0 writers (rectangular mesh) for diagnostic outputs:
//  - vector fields (valuedim 3), text or binary4
//  - scalar fields such as energy density (valuedim 1), text
//
// Binary4 uses little-endian floats and starts with the OVF2 check value 1234567.0f.
// Data order: x fastest, then y, then z.

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::grid::Grid3D;
use crate::vector_field::{ScalarField3D, VectorField3D};

#[derive(Clone, Debug, Default)]
pub struct OvfMeta {
    pub title: String,
    pub desc_lines: Vec<String>,
    pub valuelabels: Vec<String>,
    pub valueunits: Vec<String>,
}

impl OvfMeta {
    pub fn magnetization() -> Self {
        Self::vector("m", ["m_x", "m_y", "m_z"], "A/m")
    }

    pub fn demag_field() -> Self {
        Self::vector("H_demag", ["H_demag_x", "H_demag_y", "H_demag_z"], "A/m")
    }

    pub fn energy_density() -> Self {
        Self {
            title: "Edens_demag".to_string(),
            desc_lines: vec![],
            valuelabels: vec!["Edens_demag".into()],
            valueunits: vec!["J/m3".into()],
        }
    }

    fn vector(title: &str, labels: [&str; 3], unit: &str) -> Self {
        Self {
            title: title.to_string(),
            desc_lines: vec![],
            valuelabels: labels.iter().map(|s| s.to_string()).collect(),
            valueunits: vec![unit.to_string(); 3],
        }
    }

    pub fn push_desc_line<S: Into<String>>(&mut self, s: S) {
        self.desc_lines.push(s.into());
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    Ok(())
}

fn length_mismatch(what: &str, got: usize, grid: &Grid3D) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!(
            "{} length mismatch: got {}, expected {} (nx*ny*nz)",
            what,
            got,
            grid.n_cells()
        ),
    )
}

fn write_header<W: Write>(w: &mut W, grid: &Grid3D, meta: &OvfMeta) -> std::io::Result<()> {
    writeln!(w, "# OOMMF OVF 2.0")?;
    writeln!(w, "# Segment count: 1")?;
    writeln!(w, "# Begin: Segment")?;
    writeln!(w, "# Begin: Header")?;
    writeln!(w, "# Title: {}", meta.title)?;
    writeln!(w, "# meshtype: rectangular")?;
    writeln!(w, "# meshunit: m")?;

    writeln!(w, "# xmin: 0")?;
    writeln!(w, "# ymin: 0")?;
    writeln!(w, "# zmin: 0")?;
    writeln!(w, "# xmax: {:.16e}", grid.nx as f64 * grid.dx)?;
    writeln!(w, "# ymax: {:.16e}", grid.ny as f64 * grid.dy)?;
    writeln!(w, "# zmax: {:.16e}", grid.nz as f64 * grid.dz)?;

    writeln!(w, "# valuedim: {}", meta.valuelabels.len())?;
    writeln!(w, "# valuelabels: {}", meta.valuelabels.join(" "))?;
    writeln!(w, "# valueunits: {}", meta.valueunits.join(" "))?;

    for d in &meta.desc_lines {
        writeln!(w, "# Desc: {}", d)?;
    }

    writeln!(w, "# xbase: {:.16e}", 0.5 * grid.dx)?;
    writeln!(w, "# ybase: {:.16e}", 0.5 * grid.dy)?;
    writeln!(w, "# zbase: {:.16e}", 0.5 * grid.dz)?;
    writeln!(w, "# xnodes: {}", grid.nx)?;
    writeln!(w, "# ynodes: {}", grid.ny)?;
    writeln!(w, "# znodes: {}", grid.nz)?;
    writeln!(w, "# xstepsize: {:.16e}", grid.dx)?;
    writeln!(w, "# ystepsize: {:.16e}", grid.dy)?;
    writeln!(w, "# zstepsize: {:.16e}", grid.dz)?;
    writeln!(w, "# End: Header")?;
    Ok(())
}

fn write_footer<W: Write>(w: &mut W, data_tag: &str) -> std::io::Result<()> {
    writeln!(w, "# End: Data {}", data_tag)?;
    writeln!(w, "# End: Segment")?;
    w.flush()
}

pub fn write_vector_text(path: &Path, field: &VectorField3D, meta: &OvfMeta) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let grid = &field.grid;
    if field.data.len() != grid.n_cells() {
        return Err(length_mismatch("VectorField3D", field.data.len(), grid));
    }

    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, grid, meta)?;
    writeln!(w, "# Begin: Data Text")?;
    for v in &field.data {
        writeln!(w, "{:.10e} {:.10e} {:.10e}", v[0], v[1], v[2])?;
    }
    write_footer(&mut w, "Text")
}

pub fn write_vector_binary4(path: &Path, field: &VectorField3D, meta: &OvfMeta) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let grid = &field.grid;
    if field.data.len() != grid.n_cells() {
        return Err(length_mismatch("VectorField3D", field.data.len(), grid));
    }

    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, grid, meta)?;
    writeln!(w, "# Begin: Data Binary 4")?;

    let check: f32 = 1234567.0;
    w.write_all(&check.to_le_bytes())?;
    for v in &field.data {
        for c in v {
            w.write_all(&(*c as f32).to_le_bytes())?;
        }
    }
    writeln!(w)?;
    write_footer(&mut w, "Binary 4")
}

pub fn write_scalar_text(path: &Path, field: &ScalarField3D, meta: &OvfMeta) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let grid = &field.grid;
    if field.data.len() != grid.n_cells() {
        return Err(length_mismatch("ScalarField3D", field.data.len(), grid));
    }

    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, grid, meta)?;
    writeln!(w, "# Begin: Data Text")?;
    for v in &field.data {
        writeln!(w, "{:.10e}", v)?;
    }
    write_footer(&mut w, "Text")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_text_has_one_value_per_cell() {
        let grid = Grid3D::new(3, 2, 2, 1e-9, 1e-9, 1e-9);
        let mut e = ScalarField3D::new(grid);
        e.data[5] = -1.5;
        let path = std::env::temp_dir().join(format!("llg_demag_ovf_{}.ovf", std::process::id()));
        write_scalar_text(&path, &e, &OvfMeta::energy_density()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("# valuedim: 1"));
        assert!(text.contains("# znodes: 2"));
        let values: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(values.len(), 12);
        assert!(values[5].starts_with("-1.5"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn binary4_has_check_value_and_packed_data() {
        let grid = Grid3D::new(3, 2, 2, 1e-9, 1e-9, 1e-9);
        let mut m = VectorField3D::new(grid);
        m.data[0] = [1.0, -2.0, 0.5];
        m.data[11] = [0.0, 0.0, 8.0e5];
        let path = std::env::temp_dir().join(format!("llg_demag_ovf_b4_{}.ovf", std::process::id()));
        write_vector_binary4(&path, &m, &OvfMeta::magnetization()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let tag = b"# Begin: Data Binary 4\n";
        let start = bytes
            .windows(tag.len())
            .position(|w| w == tag)
            .expect("binary data tag")
            + tag.len();

        let f32_at = |at: usize| f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        assert_eq!(f32_at(start), 1234567.0);
        assert_eq!(f32_at(start + 4), 1.0);
        assert_eq!(f32_at(start + 8), -2.0);
        assert_eq!(f32_at(start + 12), 0.5);
        assert_eq!(f32_at(start + 4 + 12 * 11 + 8), 8.0e5);

        let data_end = start + 4 + 12 * grid.n_cells();
        assert_eq!(
            &bytes[data_end..],
            b"\n# End: Data Binary 4\n# End: Segment\n".as_slice()
        );
    }
}
