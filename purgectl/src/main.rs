use clap::Parser;

fn main() {
    let cli = purgectl::Cli::parse();
    if let Err(err) = purgectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
