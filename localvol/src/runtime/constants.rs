//! Runtime defaults and file names.

pub mod envs {
    /// Overrides the default home directory.
    pub const LOCALVOL_HOME: &str = "LOCALVOL_HOME";
}

pub mod defaults {
    pub const HOME_DIR_NAME: &str = ".localvol";
    pub const IMAGES_TYPE: &str = "legacy";
    pub const INSTANCES_PATH: &str = "/var/lib/localvol/instances";
    pub const COMPUTE_TOPIC: &str = "compute";
    pub const ROOT_HELPER: &str = "sudo";
    pub const QEMU_IMG: &str = "qemu-img";
    pub const MAX_CONCURRENT_OPERATIONS: usize = 4;
}

pub mod subdirs {
    pub const DB_DIR: &str = "db";
    pub const LOGS_DIR: &str = "logs";
}

pub mod filenames {
    pub const DB: &str = "localvol.db";
    /// Prefix of the daily rolling log file.
    pub const LOG_PREFIX: &str = "localvol.log";
}
