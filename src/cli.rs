use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "choop-rs",
    about = "Choop compiler producing Scratch .sb2 project archives."
)]
pub struct Args {
    /// A `.ch` source file or a `.chp` project manifest.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    #[arg(value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Disable automatic SVG normalization to 64x64.")]
    pub no_svg_scale: bool,

    #[arg(long, help = "Write the pretty-printed project.json to this path.")]
    pub emit_json: Option<PathBuf>,
}
