// Output formatting helpers for CLI commands
// Status symbols: `+` success, `x` failure, `-` skipped, `*` running,
// `o` pending. Under NO_COLOR the symbols print without ANSI codes.

fn color_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

fn paint(code: &str, text: &str) -> String {
    if color_enabled() {
        format!("\x1b[{}m{}\x1b[0m", code, text)
    } else {
        text.to_string()
    }
}

/// Print a status message: "     Parsing ci.yml"
pub fn status(action: &str, message: &str) {
    eprintln!("{} {}", paint("1;36", &format!("{:>12}", action)), message);
}

/// Success line with `+`
pub fn success(message: &str) {
    eprintln!("  {} {}", paint("1;32", "+"), message);
}

/// Failure line with `x`
pub fn failure(message: &str) {
    eprintln!("  {} {}", paint("1;31", "x"), message);
}

/// Skipped line with `-`
pub fn skipped(message: &str) {
    eprintln!("  {} {}", paint("2", "-"), message);
}

/// Running line with `*`
pub fn running(message: &str) {
    eprintln!("  {} {}", paint("1;34", "*"), message);
}

/// Pending line with `o`
pub fn pending(message: &str) {
    eprintln!("  {} {}", paint("2", "o"), message);
}

/// Warning line
pub fn warning(message: &str) {
    eprintln!("  {} {}", paint("33", "!"), message);
}

/// Error line
pub fn error(message: &str) {
    eprintln!("{} {}", paint("1;31", "error:"), message);
}

/// Informational line
pub fn info(message: &str) {
    eprintln!("  {} {}", paint("36", "i"), message);
}

/// Section header
pub fn header(message: &str) {
    eprintln!("{}", paint("1", &format!("==> {}", message)));
}

/// Step output line (indented)
pub fn step_output(line: &str) {
    println!("        | {}", line);
}

/// Step error output line (indented, red)
pub fn step_error(line: &str) {
    eprintln!("{}", paint("31", &format!("        | {}", line)));
}
