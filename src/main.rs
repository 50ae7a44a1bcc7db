fn main() {
    if let Err(err) = csv_enrich::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
