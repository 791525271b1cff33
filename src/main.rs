use std::process::ExitCode;

fn main() -> ExitCode {
    launcher_sync_lib::run()
}
