fn main() {
    if let Err(err) = tender_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
