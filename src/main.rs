use std::path::PathBuf;

fn main() {
    env_logger::init();

    let mut options = moments::Options::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("moments {}", moments::VERSION);
                return;
            }
            "--help" | "-h" => {
                println!(
                    "moments — Fetch a moments feed and render it as a waterfall page.\n\n  --source <name>      Feed source: talks, memos, mastodon, telegram\n  --output <path>      Write the page to a file instead of stdout\n  --config <path>      Use an explicit config file\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                return;
            }
            "--source" => options.source = args.next(),
            "--output" => options.output = args.next().map(PathBuf::from),
            "--config" => options.config_file = args.next().map(PathBuf::from),
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
    }

    if let Err(err) = moments::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
