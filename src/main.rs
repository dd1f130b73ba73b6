fn main() {
    if let Err(err) = refclean::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
