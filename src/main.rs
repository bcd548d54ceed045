fn main() {
    if let Err(err) = primescope::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
