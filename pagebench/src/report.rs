use std::fmt::{self, Display, Formatter};

use crate::{region::TouchMode, timer::TimingSample};

const KB: usize = 1 << 10;
const MB: usize = 1 << 20;

/// Result of a single run, printed as one line on stdout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Report {
    pub(crate) size: usize,
    pub(crate) page_size: usize,
    pub(crate) timing: TimingSample,
    pub(crate) touch: TouchMode,
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}mb via {}k pages: {}ms ({}ms mmap, {}ms {})",
            self.size / MB,
            self.page_size / KB,
            self.timing.total_ms(),
            self.timing.allocation_ms(),
            self.timing.warm_up_ms(),
            self.touch.verb(),
        )
    }
}
