use std::{env, fs, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=OUT_DIR");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let completions_dir = out_dir.join("completions");

    fs::create_dir_all(&completions_dir).unwrap();

    let mut cmd = clap::Command::new("gleaner")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Extract titles and body text from web pages")
        .arg(clap::arg!([INPUT] ... "URLs to fetch, local HTML files, or '-' for stdin"))
        .arg(
            clap::arg!(-o --output <FILE> "Append destination, '-' for stdout")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            clap::arg!(-c --config <FILE> "JSON configuration file")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(clap::arg!(--"allow-domain" <HOST> "Permit requests to this host").action(clap::ArgAction::Append))
        .arg(clap::arg!(--"title-selector" <SELECTOR> "Selector for the page title"))
        .arg(clap::arg!(--"content-root" <SELECTOR> "Selector for the content root(s)"))
        .arg(clap::arg!(--exclude <SELECTOR> "Selector removed from the content").action(clap::ArgAction::Append))
        .arg(clap::arg!(--header <HEADER> "Override an outbound header (NAME:VALUE)").action(clap::ArgAction::Append))
        .arg(clap::arg!(--"user-agent" <UA> "Custom User-Agent for HTTP requests"))
        .arg(clap::arg!(--timeout <SECS> "HTTP timeout in seconds"))
        .arg(clap::arg!(--concurrency <NUM> "Visits in flight for batch runs"))
        .arg(clap::arg!(--"per-host" <NUM> "Simultaneous requests per host for batch runs"))
        .arg(clap::arg!(--"delay-ms" <MS> "Minimum gap between requests to one host"))
        .arg(clap::arg!(--retries <NUM> "Retries for network failures and 5xx responses"))
        .arg(clap::arg!(--deadline <SECS> "Cancel a batch run after this many seconds"))
        .arg(clap::arg!(-v --verbose "Enable debug logging"));

    clap_complete::generate_to(clap_complete::shells::Bash, &mut cmd, "gleaner", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Zsh, &mut cmd, "gleaner", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Fish, &mut cmd, "gleaner", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::PowerShell, &mut cmd, "gleaner", &completions_dir).unwrap();

    println!(
        "cargo:warning=Shell completions generated in: {}",
        completions_dir.display()
    );
}
