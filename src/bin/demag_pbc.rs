// src/bin/demag_pbc.rs
//
// Periodic-image convergence of the demag field (Nz = 1, periodic in x and y):
//   SetPBC(P, P, 0) for P in 0, 1, 2, 4, 8, 16, 32
//   Geometry: (Nx, Ny, Nz) = (4, 4, 1), cube cells 1 nm
//
// A uniformly magnetised periodic film approaches the infinite-film limit
// Nzz -> 1, Nxx = Nyy -> 0 as P grows. Each row also reports the change from the
// previous P, which should shrink monotonically.
//
// Run:
//   cargo run --release --bin demag_pbc
//
// Output:
//   out/demag_pbc/rust_demag_pbc.csv
//   out/demag_pbc/report.json

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::Path;

use llg_demag::config::{init_tracing, EngineSettings, ReportEntry, RunInfo, RunReport};
use llg_demag::convolution::FinishOptions;
use llg_demag::demag::DemagConvolution;
use llg_demag::error::ConvResult;
use llg_demag::grid::{Grid3D, PbcImages};
use llg_demag::vector_field::VectorField3D;

const IMAGES: [usize; 7] = [0, 1, 2, 4, 8, 16, 32];

fn main() -> ConvResult<()> {
    init_tracing();
    let grid = Grid3D::film(4, 4, 1e-9, 1e-9, 1e-9);
    let settings = EngineSettings::from_env();
    let mut demag = DemagConvolution::new(&settings);

    let out_dir = Path::new("out").join("demag_pbc");
    create_dir_all(&out_dir)?;
    let mut w = BufWriter::new(File::create(out_dir.join("rust_demag_pbc.csv"))?);
    writeln!(w, "nx,ny,nz,pbc_x,pbc_y,Nxx,Nyy,Nzz,dNzz")?;

    let mut mx = VectorField3D::uniform(grid, [1.0, 0.0, 0.0]);
    let mz = VectorField3D::uniform(grid, [0.0, 0.0, 1.0]);
    let mut h = VectorField3D::new(grid);
    let mut results = Vec::new();
    let mut prev_nzz: Option<f64> = None;
    let mut last_dims = None;

    for p in IMAGES {
        let pbc = PbcImages::new(p, p, 0);
        demag.configure(grid, true, pbc)?;

        demag.convolute(&mx, &mut h, FinishOptions::overwrite())?;
        let nxx = -h.average()[0];
        mx.set_uniform(0.0, 1.0, 0.0);
        demag.convolute(&mx, &mut h, FinishOptions::overwrite())?;
        let nyy = -h.average()[1];
        mx.set_uniform(1.0, 0.0, 0.0);
        demag.convolute(&mz, &mut h, FinishOptions::overwrite())?;
        let nzz = -h.average()[2];

        let delta = prev_nzz.map_or(f64::NAN, |prev| nzz - prev);
        prev_nzz = Some(nzz);

        writeln!(
            w,
            "{},{},{},{},{},{:.16e},{:.16e},{:.16e},{:.16e}",
            grid.nx, grid.ny, grid.nz, p, p, nxx, nyy, nzz, delta
        )?;
        println!(
            "P = {:>2}: Nxx = {:.6}  Nyy = {:.6}  Nzz = {:.6}  dNzz = {:+.3e}",
            p, nxx, nyy, nzz, delta
        );
        results.push(ReportEntry {
            label: format!("Nzz P={}", p),
            value: nzz,
            reference: Some(1.0),
        });
        last_dims = demag.dims().copied();
    }
    w.flush()?;

    if let Some(dims) = last_dims {
        let report = RunReport {
            geometry: grid,
            pbc: dims.pbc,
            padded: dims.padded,
            mode: format!("{:?}", dims.mode()),
            settings,
            results,
            run: RunInfo::new("demag_pbc"),
        };
        report.write_to_dir(&out_dir)?;
    }

    println!("Wrote out/demag_pbc/rust_demag_pbc.csv");
    Ok(())
}
