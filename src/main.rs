fn main() {
    if let Err(e) = toolgate::cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
