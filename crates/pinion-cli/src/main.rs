//! Command line runner: `pinion <script.py> [args...]`.

use std::path::Path;
use std::process::ExitCode;

use pinion::{Config, Context};

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(script) = args.next() else {
        eprintln!("usage: pinion <script.py> [args...]");
        return ExitCode::from(2);
    };
    let argv: Vec<String> = std::iter::once(script.clone()).chain(args).collect();

    let source = match std::fs::read_to_string(&script) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("pinion: cannot read '{script}': {err}");
            return ExitCode::from(2);
        }
    };

    let import_path = Path::new(&script)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf);

    let config = Config {
        argv,
        import_path,
        ..Config::default()
    };
    let mut ctx = match Context::new(config) {
        Ok(ctx) => ctx,
        Err(exc) => {
            eprint!("{}", exc.traceback());
            return ExitCode::FAILURE;
        }
    };

    let program = match ctx.compile(&source, "__main__") {
        Ok(program) => program,
        Err(exc) => {
            eprint!("{}", exc.traceback());
            return ExitCode::FAILURE;
        }
    };

    match ctx.invoke(program, &[], &[]) {
        Ok(_) => ExitCode::SUCCESS,
        Err(exc) if exc.is_system_exit() => ExitCode::SUCCESS,
        Err(exc) => {
            eprint!("{}", exc.traceback());
            ExitCode::FAILURE
        }
    }
}
