use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "brainchop",
    version,
    about = "Brain MRI segmentation toolkit",
    long_about = "Inspect, conform and label NIfTI brain volumes.\n\
                  Volumes are conformed to 256x256x256 LIA before segmentation."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show header and orientation of a NIfTI volume
    Info(InfoArgs),
    /// Resample a volume to the conformed 256^3 LIA grid
    Conform(ConformArgs),
    /// Build a label overlay from a segmentation and report label volumes
    Labels(LabelsArgs),
    /// List the models of a catalog
    Models(ModelsArgs),
}

#[derive(Args)]
pub struct InfoArgs {
    /// Input NIfTI file (.nii or .nii.gz)
    #[arg(long)]
    pub file: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ConformArgs {
    /// Input NIfTI file
    #[arg(long)]
    pub file: String,

    /// Where to write the conformed volume
    #[arg(long)]
    pub output: String,

    /// Trilinear instead of nearest-neighbour sampling
    #[arg(long, env = "BRAINCHOP_CONFORM_LINEAR", default_value_t = false)]
    pub linear: bool,

    /// Rescale intensities between the 2nd and 98th percentile
    #[arg(long, default_value_t = false)]
    pub robust: bool,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct LabelsArgs {
    /// Source image the labels were computed from
    #[arg(long)]
    pub file: String,

    /// Label volume (one class id per voxel)
    #[arg(long)]
    pub labels: String,

    /// Palette JSON with R, G, B and labels arrays; relative paths resolve
    /// against $BRAINCHOP_MODELS_ROOT
    #[arg(long)]
    pub palette: Option<String>,

    /// Colormap used when no palette is given
    #[arg(long, default_value = "Fire")]
    pub colormap: String,

    /// Write the overlay volume here
    #[arg(long)]
    pub output: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ModelsArgs {
    /// Model catalog JSON
    #[arg(long, env = "BRAINCHOP_MODEL_CATALOG")]
    pub catalog: String,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
