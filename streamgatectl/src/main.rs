use clap::Parser;

fn main() {
    let cli = streamgatectl::Cli::parse();
    if let Err(err) = streamgatectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
