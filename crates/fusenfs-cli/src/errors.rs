use std::error::Error;

/// Print `err` and its chain of causes to stderr.
pub fn print_error(err: &dyn Error) {
    eprintln!("Error: {}", err);

    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {}", cause);
        source = cause.source();
    }
}
