//! Storage and disk image constants.
//!
//! Centralized location for all backend tool parameters.

/// QCOW2 disk image configuration
pub mod qcow2 {
    /// Cluster size passed to `qemu-img create -o cluster_size=...`
    pub const CLUSTER_SIZE: &str = "2M";
}

/// Logical volume configuration
pub mod lvm {
    /// Root under which device-mapper exposes `<vg>/<lv>` nodes
    pub const DEV_ROOT: &str = "/dev";

    /// Block size for `dd` when copying a snapshot device to a file
    pub const DD_BLOCK_SIZE: &str = "1M";

    /// `lv_attr` characters marking an open device or a merging origin
    pub const OPEN_ATTR_FLAGS: [char; 2] = ['o', 'O'];
}

/// File-backed image configuration
pub mod file {
    /// Image file name used when the caller names none
    pub const DEFAULT_IMAGE_NAME: &str = "disk";
}
