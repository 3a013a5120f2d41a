// MULTIDOM LOGGING
// LIBRARY CODE LOGS THROUGH THE log FACADE. THE BINARY ROUTES IT TO STDERR
// AS "LEVEL target: message". -v RAISES THE LEVEL, MULTIDOM_LOG OVERRIDES.

use std::io::Write;

use log::LevelFilter;

pub fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(verbose: u8) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level_for(verbose))
        .parse_env("MULTIDOM_LOG")
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "{:<5} {}: {}",
                record.level().as_str(),
                record.target(),
                record.args()
            )
        });
    // ALREADY INSTALLED: KEEP THE FIRST ONE
    let _ = builder.try_init();
}
