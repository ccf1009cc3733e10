use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::output;
use brainchop_rs::nifti_io;
use serde::Serialize;

#[derive(Serialize)]
struct InfoOutput {
    file: String,
    dims: [usize; 3],
    datatype: String,
    pixdim: [f32; 3],
    affine: [[f64; 4]; 3],
    perm_ras: [i8; 3],
    conformed: bool,
    intent_code: i16,
}

pub fn execute(args: InfoArgs) -> i32 {
    let volume = match nifti_io::read_volume(&args.file) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let header = volume.header();
    let info = InfoOutput {
        file: args.file.clone(),
        dims: header.dims,
        datatype: header.datatype.to_string(),
        pixdim: header.pixdim,
        affine: header.affine,
        perm_ras: header.perm_ras(),
        conformed: header.is_conformed(),
        intent_code: header.intent_code,
    };

    if args.json {
        return output::print_json(&info);
    }

    println!("File: {}", info.file);
    println!(
        "Dimensions: {} x {} x {} ({})",
        info.dims[0], info.dims[1], info.dims[2], info.datatype
    );
    println!(
        "Voxel size: {:.3} x {:.3} x {:.3} mm",
        info.pixdim[0], info.pixdim[1], info.pixdim[2]
    );
    println!(
        "permRAS: [{}, {}, {}]",
        info.perm_ras[0], info.perm_ras[1], info.perm_ras[2]
    );
    println!("Conformed: {}", if info.conformed { "yes" } else { "no" });

    exit_codes::SUCCESS
}
