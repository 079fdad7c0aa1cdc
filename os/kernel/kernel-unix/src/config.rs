use alloc::string::String;
use kernel_info::config::Tuple;

/// Per-process settings folded from the root tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Randomized placement in the process heaps; off when `noaslr` is present.
    pub aslr: bool,
    /// Start the debug listener instead of halting on a fatal fault (`fault`).
    pub debug_on_fault: bool,
    /// Boot image name (`kernel`).
    pub kernel_image: Option<String>,
}

impl ProcessConfig {
    #[must_use]
    pub fn from_root(root: &Tuple) -> Self {
        Self {
            aslr: !root.contains("noaslr"),
            debug_on_fault: root.contains("fault"),
            kernel_image: root.get_str("kernel").map(String::from),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::from_root(&Tuple::new())
    }
}
