fn main() {
    if let Err(err) = ytlive::run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
