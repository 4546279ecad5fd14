use std::path::PathBuf;

pub fn default_cal_folder() -> PathBuf {
    PathBuf::from("cal")
}

pub fn default_log_level() -> String {
    String::from("info")
}

pub fn default_tolerance() -> f64 {
    0.01
}

pub fn default_resolution() -> f64 {
    1e-4
}
