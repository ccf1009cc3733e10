use crate::cli::ConformArgs;
use crate::exit_codes;
use crate::output;
use brainchop_rs::conform::{ConformanceGate, Interpolation, ResliceConformer};
use brainchop_rs::nifti_io;
use serde::Serialize;

#[derive(Serialize)]
struct ConformOutput {
    file: String,
    output: String,
    outcome: String,
    interpolation: String,
    source_dims: [usize; 3],
    source_perm_ras: [i8; 3],
}

pub fn execute(args: ConformArgs) -> i32 {
    let volume = match nifti_io::read_volume(&args.file) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let interpolation = if args.linear {
        Interpolation::Linear
    } else {
        Interpolation::Nearest
    };
    let source_dims = volume.dims();
    let source_perm_ras = volume.perm_ras();
    let gate = ConformanceGate::new(ResliceConformer::new(interpolation, args.robust));

    let (conformed, outcome) = match gate.conform_volume(volume) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    if let Err(e) = nifti_io::write_volume(&conformed, &args.output) {
        eprintln!("Error: {}", e);
        return exit_codes::EXECUTION_ERROR;
    }

    let result = ConformOutput {
        file: args.file.clone(),
        output: args.output.clone(),
        outcome: outcome.to_string(),
        interpolation: interpolation.to_string(),
        source_dims,
        source_perm_ras,
    };

    if args.json {
        return output::print_json(&result);
    }

    println!(
        "{} -> {} ({}, {} interpolation)",
        result.file, result.output, result.outcome, result.interpolation
    );
    exit_codes::SUCCESS
}
