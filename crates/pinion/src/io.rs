//! Output sink for the `print` builtin.

use std::cell::RefCell;
use std::io::Write as _;
use std::rc::Rc;

/// Receives everything the script prints.
///
/// Implement this to capture or redirect output from embedded code; the
/// default [`StdPrint`] writes to stdout.
pub trait PrintWriter {
    fn write(&mut self, text: &str);
}

/// Writes to the process stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, text: &str) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects output into a shared string buffer; used by tests and
/// embedders that want the output back.
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    buffer: Rc<RefCell<String>>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the buffer that stays readable after the writer has
    /// been handed to the context.
    #[must_use]
    pub fn handle(&self) -> Rc<RefCell<String>> {
        self.buffer.clone()
    }
}

impl PrintWriter for CollectStringPrint {
    fn write(&mut self, text: &str) {
        self.buffer.borrow_mut().push_str(text);
    }
}
