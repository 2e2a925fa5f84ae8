//! Call-bracket tracer core.
//!
//! One [`Tracer`] is shared by every thread of the traced program. Entry and
//! exit are synchronous, non-yielding critical sections bounded by a few
//! memory operations: the depth counter and flags are lock-free atomics, and
//! only the entry append and the per-thread pending stacks take a mutex.

use std::collections::HashMap;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use owo_colors::OwoColorize;
use parking_lot::Mutex;

use crate::clock::{MonotonicClock, SystemClock};
use crate::entry::{format_duration, format_values, ArgValue, CompletionResult, TraceEntry};

/// Default warn threshold: 1 ms.
pub const DEFAULT_WARN_NS: i64 = 1_000_000;
/// Default hot threshold: 10 ms.
pub const DEFAULT_HOT_NS: i64 = 10_000_000;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// First-class identifier for the calling thread: a dense sequential id
/// handed out on first use and stable for the thread's lifetime.
pub(crate) fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Duration class relative to the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatClass {
    Fast,
    Warm,
    Hot,
}

/// A call buffered by the panic-triggered mode; printed only if the thread
/// unwinds.
#[derive(Debug, Clone)]
struct PendingFrame {
    name: String,
    args: String,
    file: &'static str,
    line: u32,
    depth: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Immediate,
    PanicBuffered,
}

/// Shared tracer context.
///
/// Constructed fresh per test; the process boundary uses the singleton in
/// the crate root.
pub struct Tracer {
    entries: Mutex<Vec<TraceEntry>>,
    pending: Mutex<HashMap<u64, Vec<PendingFrame>>>,
    depth: AtomicI32,
    warn_ns: AtomicI64,
    hot_ns: AtomicI64,
    colorize: AtomicBool,
    panic_dumped: AtomicBool,
    panic_dumps: AtomicUsize,
    start_ns: u64,
    clock: Arc<dyn MonotonicClock>,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer {
    /// New tracer on the system clock. The color-disable signal (`NO_COLOR`)
    /// is read exactly once, here.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn MonotonicClock>) -> Self {
        let start_ns = clock.now_nanos();
        Self {
            entries: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            depth: AtomicI32::new(0),
            warn_ns: AtomicI64::new(DEFAULT_WARN_NS),
            hot_ns: AtomicI64::new(DEFAULT_HOT_NS),
            colorize: AtomicBool::new(std::env::var_os("NO_COLOR").is_none()),
            panic_dumped: AtomicBool::new(false),
            panic_dumps: AtomicUsize::new(0),
            start_ns,
            clock,
        }
    }

    /// Opens a traced call bracket, printing the entry line immediately.
    #[track_caller]
    pub fn span(&self, name: &str, args: Vec<ArgValue>) -> Span<'_> {
        self.enter(name, args, Mode::Immediate, Location::caller())
    }

    /// Opens a traced call bracket in panic-buffered mode: nothing is
    /// printed unless the call unwinds, in which case the whole per-thread
    /// stack is dumped once.
    #[track_caller]
    pub fn span_on_panic(&self, name: &str, args: Vec<ArgValue>) -> Span<'_> {
        self.enter(name, args, Mode::PanicBuffered, Location::caller())
    }

    fn enter(
        &self,
        name: &str,
        args: Vec<ArgValue>,
        mode: Mode,
        loc: &'static Location<'static>,
    ) -> Span<'_> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let start_ns = self.clock.now_nanos();
        let thread = current_thread_id();
        let file = basename(loc.file());
        let line = loc.line();

        match mode {
            Mode::Immediate => self.print_enter(depth, name, &args, file, line, thread),
            Mode::PanicBuffered => {
                let frame = PendingFrame {
                    name: name.to_string(),
                    args: format_values(&args),
                    file,
                    line,
                    depth,
                };
                self.pending.lock().entry(thread).or_default().push(frame);
            }
        }

        Span {
            tracer: self,
            name: name.to_string(),
            args,
            depth,
            start_ns,
            thread,
            file,
            line,
            mode,
            completed: false,
        }
    }

    fn exit(&self, span: &mut Span<'_>, result: CompletionResult) {
        let end_ns = self.clock.now_nanos();
        // End is sampled after start on the same thread, so this never
        // actually saturates.
        let duration_ns = end_ns.saturating_sub(span.start_ns);

        let (panicked, payload, returns) = match result {
            CompletionResult::Normal(returns) => (false, None, returns),
            CompletionResult::Unwinding(payload) => (true, Some(payload), Vec::new()),
        };

        match span.mode {
            Mode::Immediate => {
                if panicked {
                    self.print_panic(span.depth, &span.name, duration_ns, payload.as_deref());
                } else {
                    self.print_exit(span.depth, &span.name, &returns, duration_ns);
                }
            }
            Mode::PanicBuffered => {
                let mut pending = self.pending.lock();
                let stack = pending.entry(span.thread).or_default();
                if panicked {
                    // First panic across all threads wins the dump; the
                    // stack is left in place.
                    if !self.panic_dumped.swap(true, Ordering::SeqCst) {
                        self.panic_dumps.fetch_add(1, Ordering::SeqCst);
                        dump_pending_stack(span.thread, stack, payload.as_deref());
                    }
                } else {
                    stack.pop();
                }
            }
        }

        let entry = TraceEntry {
            name: std::mem::take(&mut span.name),
            args: std::mem::take(&mut span.args),
            returns,
            depth: span.depth,
            start_ns: span.start_ns,
            end_ns,
            duration_ns,
            thread: span.thread,
            file: span.file,
            line: span.line,
            panicked,
            panic_payload: payload,
        };
        self.entries.lock().push(entry);
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }

    /// Snapshot copy of all recorded entries, in completion order.
    #[must_use]
    pub fn get_traces(&self) -> Vec<TraceEntry> {
        self.entries.lock().clone()
    }

    /// Clears recorded entries and per-thread stacks, and rearms the depth
    /// counter and the panic-dump flag. Intended between independent
    /// measurement windows.
    pub fn reset(&self) {
        self.entries.lock().clear();
        self.pending.lock().clear();
        self.depth.store(0, Ordering::SeqCst);
        self.panic_dumped.store(false, Ordering::SeqCst);
    }

    /// Reconfigures the warn/hot boundaries (nanoseconds). Read by every
    /// exit event, so the change applies to subsequent classification only.
    pub fn set_thresholds(&self, warn_ns: i64, hot_ns: i64) {
        self.warn_ns.store(warn_ns, Ordering::SeqCst);
        self.hot_ns.store(hot_ns, Ordering::SeqCst);
    }

    pub fn set_colorize(&self, enabled: bool) {
        self.colorize.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn classify(&self, duration_ns: u64) -> HeatClass {
        let as_i64 = i64::try_from(duration_ns).unwrap_or(i64::MAX);
        if as_i64 >= self.hot_ns.load(Ordering::SeqCst) {
            HeatClass::Hot
        } else if as_i64 >= self.warn_ns.load(Ordering::SeqCst) {
            HeatClass::Warm
        } else {
            HeatClass::Fast
        }
    }

    pub(crate) fn hot_threshold_ns(&self) -> u64 {
        u64::try_from(self.hot_ns.load(Ordering::SeqCst)).unwrap_or(0)
    }

    pub(crate) fn start_ns(&self) -> u64 {
        self.start_ns
    }

    pub(crate) fn colorize_enabled(&self) -> bool {
        self.colorize.load(Ordering::SeqCst)
    }

    /// How many times a buffered panic stack has been dumped. At most one
    /// per measurement window.
    #[must_use]
    pub fn panic_dump_count(&self) -> usize {
        self.panic_dumps.load(Ordering::SeqCst)
    }

    fn print_enter(
        &self,
        depth: i32,
        name: &str,
        args: &[ArgValue],
        file: &str,
        line: u32,
        thread: u64,
    ) {
        let indent = indent_for(depth);
        let args = format_values(args);
        if self.colorize_enabled() {
            println!(
                "{indent}{} {}{} {}",
                "→".green(),
                name.cyan().bold(),
                format!("({args})").red(),
                format!("[{file}:{line} t{thread}]").dimmed(),
            );
        } else {
            println!("{indent}→ {name}({args}) [{file}:{line} t{thread}]");
        }
    }

    fn print_exit(&self, depth: i32, name: &str, returns: &[ArgValue], duration_ns: u64) {
        let indent = indent_for(depth);
        let dur = format_duration(duration_ns);
        let ret = if returns.is_empty() {
            String::new()
        } else {
            format!(" → {}", format_values(returns))
        };
        if self.colorize_enabled() {
            let (styled, tag) = match self.classify(duration_ns) {
                HeatClass::Hot => (dur.red().bold().to_string(), format!(" {}", "HOT".red().bold())),
                HeatClass::Warm => (dur.yellow().to_string(), String::new()),
                HeatClass::Fast => (dur.cyan().to_string(), String::new()),
            };
            println!("{indent}{} {}{} {styled}{tag}", "←".magenta(), name.dimmed(), ret);
        } else {
            println!("{indent}← {name}{ret} ({dur})");
        }
    }

    fn print_panic(&self, depth: i32, name: &str, duration_ns: u64, payload: Option<&str>) {
        let indent = indent_for(depth);
        let payload = payload.unwrap_or("panic");
        let dur = format_duration(duration_ns);
        if self.colorize_enabled() {
            println!(
                "{indent}{} {}: {} ({dur})",
                "PANIC".white().on_red().bold(),
                name.cyan().bold(),
                payload.red().bold(),
            );
        } else {
            println!("{indent}PANIC {name}: {payload} ({dur})");
        }
    }
}

/// Completion handle for a traced call; invoke [`Span::complete`] when the
/// call ends. Dropping the span without completing it falls back to
/// `std::thread::panicking()` to tell a normal return from an unwind.
pub struct Span<'a> {
    tracer: &'a Tracer,
    name: String,
    args: Vec<ArgValue>,
    depth: i32,
    start_ns: u64,
    thread: u64,
    file: &'static str,
    line: u32,
    mode: Mode,
    completed: bool,
}

impl Span<'_> {
    /// Closes the bracket with an explicit outcome. For
    /// [`CompletionResult::Unwinding`] the caller re-raises afterwards.
    pub fn complete(mut self, result: CompletionResult) {
        self.completed = true;
        let mut span = self;
        let tracer = span.tracer;
        tracer.exit(&mut span, result);
    }
}

impl Drop for Span<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let result = if std::thread::panicking() {
            CompletionResult::Unwinding("panic".to_string())
        } else {
            CompletionResult::Normal(Vec::new())
        };
        let tracer = self.tracer;
        tracer.exit(self, result);
    }
}

fn indent_for(depth: i32) -> String {
    "  ".repeat(usize::try_from(depth.saturating_sub(1)).unwrap_or(0))
}

fn basename(path: &'static str) -> &'static str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn dump_pending_stack(thread: u64, stack: &[PendingFrame], payload: Option<&str>) {
    let payload = payload.unwrap_or("panic");
    eprintln!("panic in traced call on t{thread}: {payload}");
    for frame in stack {
        let indent = indent_for(frame.depth);
        eprintln!("{indent}→ {}({}) [{}:{}]", frame.name, frame.args, frame.file, frame.line);
    }
}
