use crate::cli::LabelsArgs;
use crate::exit_codes;
use crate::output;
use brainchop_rs::catalog::{InferenceOptions, ModelDescriptor};
use brainchop_rs::config::SessionConfig;
use brainchop_rs::nifti_io;
use brainchop_rs::overlay::{LabelEntry, LabelMismatch, OverlaySynthesizer};
use brainchop_rs::volume::{DataType, Volume};
use serde::Serialize;

#[derive(Serialize)]
struct LabelsOutput {
    file: String,
    labels: String,
    distinct_values: usize,
    colormap: String,
    entries: Vec<LabelEntry>,
    /// Voxel count per observed value
    counts: Vec<(u8, u64)>,
    mismatch: Option<LabelMismatch>,
    output: Option<String>,
}

/// Class ids as stored, rounded and clamped to the 8-bit label range.
fn label_values(volume: &Volume) -> Vec<u8> {
    if volume.header().datatype == DataType::Uint8 {
        return volume.img().to_vec();
    }
    (0..volume.header().voxel_count())
        .map(|i| volume.voxel_value(i).round().clamp(0.0, 255.0) as u8)
        .collect()
}

pub fn execute(args: LabelsArgs) -> i32 {
    let config = match SessionConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };

    let source = match nifti_io::read_volume(&args.file) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };
    let label_volume = match nifti_io::read_volume(&args.labels) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };
    if source.dims() != label_volume.dims() {
        eprintln!(
            "Error: label volume {:?} does not match source volume {:?}",
            label_volume.dims(),
            source.dims()
        );
        return exit_codes::INPUT_ERROR;
    }

    let pixdim = source.header().pixdim;
    if pixdim.iter().any(|d| (d - 1.0).abs() > 1e-3) {
        eprintln!(
            "Warning: voxels are {} x {} x {} mm, label volumes below are voxel counts, not mm3. \
             Run 'brainchop conform' first for 1 mm voxels.",
            pixdim[0], pixdim[1], pixdim[2]
        );
    }

    let mut model = ModelDescriptor::new(0, "labels");
    if let Some(palette) = &args.palette {
        model = model.with_colormap(palette.as_str());
    }
    let options = InferenceOptions {
        atlas_selected_color_table: args.colormap.clone(),
        ..InferenceOptions::default()
    };

    let synthesizer = OverlaySynthesizer::new(config.palette_source())
        .with_fallback_colormap(config.fallback_colormap.clone())
        .with_opacity(config.overlay_opacity);
    let overlay = match synthesizer.synthesize(&source, label_values(&label_volume), &model, &options)
    {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };
    if let Some(err) = &overlay.palette_error {
        eprintln!("Error: {}", err);
        return exit_codes::CONFIG_ERROR;
    }

    if let Some(path) = &args.output {
        if let Err(e) = nifti_io::write_volume(&overlay.volume, path) {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    let result = LabelsOutput {
        file: args.file.clone(),
        labels: args.labels.clone(),
        distinct_values: overlay.counts.distinct(),
        colormap: overlay.volume.colormap.clone(),
        entries: overlay
            .descriptor
            .map(|d| d.entries)
            .unwrap_or_default(),
        counts: overlay.counts.iter().collect(),
        mismatch: overlay.mismatch,
        output: args.output.clone(),
    };

    if args.json {
        return output::print_json(&result);
    }

    if result.entries.is_empty() {
        println!("Colormap: {}", result.colormap);
        for (value, count) in &result.counts {
            println!("{:>5}   {} mm3", value, count);
        }
    } else {
        for entry in &result.entries {
            println!("{:>5}   {}", entry.class_id, entry.annotated());
        }
    }
    if let Some(mismatch) = &result.mismatch {
        println!();
        println!("{}", mismatch.note());
    }
    if let Some(path) = &result.output {
        eprintln!("Overlay written to {}", path);
    }

    exit_codes::SUCCESS
}
