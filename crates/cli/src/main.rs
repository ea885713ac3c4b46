use std::process::ExitCode;

fn main() -> ExitCode {
    comanda_cli::run()
}
