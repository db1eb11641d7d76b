// crates.io
use clap::Parser;
// self
use juris_eval::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = Args::parse();
	juris_eval::run(args).await
}
