// src/bin/demag_cube.rs
//
// Developer diagnostic: demag factors of a uniformly magnetised prism.
//
// Each axis in turn: m = Ms e_i, H = demag field, N_ii = -<H_i> / Ms over the prism,
// compared with the closed-form prism factors (Aharoni 1998). The energy density is
// checked against mu0 Ms^2 N_ii / 2.
//
// Usage:
//   cargo run --release --bin demag_cube
//   cargo run --release --bin demag_cube -- 12 8 4 1e-9 1e-9 1e-9
//
// Output:
//   out/demag_cube/report.json

use std::path::Path;

use llg_demag::config::{init_tracing, EngineSettings, ReportEntry, RunInfo, RunReport};
use llg_demag::convolution::FinishOptions;
use llg_demag::demag::analytic::prism_factors;
use llg_demag::demag::DemagConvolution;
use llg_demag::error::ConvResult;
use llg_demag::grid::{Grid3D, PbcImages};
use llg_demag::params::MU0;
use llg_demag::vector_field::VectorField3D;

fn main() -> ConvResult<()> {
    init_tracing();
    let args: Vec<String> = std::env::args().collect();

    let grid = if args.len() == 7 {
        Grid3D::new(
            args[1].parse::<usize>().expect("nx"),
            args[2].parse::<usize>().expect("ny"),
            args[3].parse::<usize>().expect("nz"),
            args[4].parse::<f64>().expect("dx"),
            args[5].parse::<f64>().expect("dy"),
            args[6].parse::<f64>().expect("dz"),
        )
    } else {
        Grid3D::new(12, 8, 4, 1e-9, 1e-9, 1e-9)
    };

    let settings = EngineSettings::from_env();
    let mut demag = DemagConvolution::new(&settings);
    demag.configure(grid, true, PbcImages::open())?;

    let ms = 8.0e5;
    let exact = prism_factors(
        grid.nx as f64 * grid.dx,
        grid.ny as f64 * grid.dy,
        grid.nz as f64 * grid.dz,
    );

    let mut m = VectorField3D::new(grid);
    let mut h = VectorField3D::new(grid);
    let mut results = Vec::new();
    let mut trace = 0.0;

    for (axis, label) in ["Nxx", "Nyy", "Nzz"].iter().enumerate() {
        let mut v = [0.0; 3];
        v[axis] = ms;
        m.set_uniform(v[0], v[1], v[2]);

        let e = demag
            .convolute(&m, &mut h, FinishOptions::overwrite().with_energy())?
            .unwrap_or(0.0);
        let n = -h.average()[axis] / ms;
        let n_from_energy = 2.0 * e / (MU0 * ms * ms);
        trace += n;

        println!(
            "{}: field {:.6}  energy {:.6}  exact {:.6}  rel.err {:.2e}",
            label,
            n,
            n_from_energy,
            exact[axis],
            (n - exact[axis]) / exact[axis]
        );
        results.push(ReportEntry {
            label: label.to_string(),
            value: n,
            reference: Some(exact[axis]),
        });
        results.push(ReportEntry {
            label: format!("{} (energy)", label),
            value: n_from_energy,
            reference: Some(exact[axis]),
        });
    }
    println!("Trace check: Nxx+Nyy+Nzz = {:.6}", trace);

    let dims = demag.dims().copied().expect("configured above");
    let report = RunReport {
        geometry: grid,
        pbc: dims.pbc,
        padded: dims.padded,
        mode: format!("{:?}", dims.mode()),
        settings,
        results,
        run: RunInfo::new("demag_cube"),
    };
    let out_dir = Path::new("out").join("demag_cube");
    report.write_to_dir(&out_dir)?;
    println!("Wrote {:?}", out_dir.join("report.json"));
    Ok(())
}
