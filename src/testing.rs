//! Collaborator doubles for unit tests.
//!
//! Every user process in a test runs on its own std thread. The scheduler
//! maps those threads to `Tid`s and blocks them with park/unpark, which
//! keeps a wakeup that arrives before `block()`.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle, Thread};

use crate::config::KernelConfig;
use crate::drivers::Console;
use crate::exception::{Disposition, InterruptFrame, Machine};
use crate::fs::{File, FileSystem, FsLock};
use crate::kernel::{Kernel, LoadError, Loader, Services, SpawnError, SpawnRequest};
use crate::mm::{PageFlags, UserPageTable, VirtAddr, PAGE_SIZE, PHYS_BASE};
use crate::process::{program_name, Process};
use crate::sched::{Scheduler, Tid};
use crate::syscall::numbers::SYS_EXIT;

/// Read-write data pages start here.
pub const DATA_BASE: usize = 0x0804_8000;
pub const DATA_PAGES: usize = 2;
/// One read-only page right after the data, followed by a hole.
pub const RODATA_BASE: usize = DATA_BASE + DATA_PAGES * PAGE_SIZE;
/// The single stack page, just below `PHYS_BASE`.
pub const STACK_PAGE: usize = PHYS_BASE - PAGE_SIZE;
/// Stack pointer used by `UserProc::syscall`.
pub const USER_ESP: usize = PHYS_BASE - 64;

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_TID: Cell<Option<Tid>> = const { Cell::new(None) };
}

fn thread_tid() -> Tid {
    THREAD_TID.with(|slot| {
        slot.get().unwrap_or_else(|| {
            let tid = Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed));
            slot.set(Some(tid));
            tid
        })
    })
}

/// `Scheduler` over std threads.
#[derive(Default)]
pub struct ThreadScheduler {
    threads: Mutex<HashMap<Tid, Thread>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for ThreadScheduler {
    fn current(&self) -> Tid {
        let tid = thread_tid();
        self.threads
            .lock()
            .unwrap()
            .entry(tid)
            .or_insert_with(thread::current);
        tid
    }

    fn block(&self) {
        thread::park();
    }

    fn unblock(&self, tid: Tid) {
        if let Some(thread) = self.threads.lock().unwrap().get(&tid) {
            thread.unpark();
        }
    }

    fn exit_current(&self) -> ! {
        panic!("thread {} exited", thread_tid());
    }
}

/// `Machine` whose power button panics.
pub struct TestMachine;

impl Machine for TestMachine {
    fn power_off(&self) -> ! {
        panic!("machine powered off");
    }
}

/// Console that records every `put_buf` block and replays scripted input.
#[derive(Default)]
pub struct RecordingConsole {
    blocks: Mutex<Vec<Vec<u8>>>,
    input: Mutex<VecDeque<u8>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(input: &[u8]) -> Self {
        Self {
            blocks: Mutex::default(),
            input: Mutex::new(input.iter().copied().collect()),
        }
    }

    pub fn blocks(&self) -> Vec<Vec<u8>> {
        self.blocks.lock().unwrap().clone()
    }

    /// Everything written so far, concatenated.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.blocks().concat()).into_owned()
    }
}

impl Console for RecordingConsole {
    fn put_buf(&self, bytes: &[u8]) {
        self.blocks.lock().unwrap().push(bytes.to_vec());
    }

    fn getc(&self) -> u8 {
        self.input.lock().unwrap().pop_front().unwrap_or(0)
    }
}

type Contents = Arc<Mutex<Vec<u8>>>;

/// In-memory flat file system. Removed files live on while open.
#[derive(Default)]
pub struct MemFs {
    files: Mutex<HashMap<String, Contents>>,
    open: Arc<AtomicUsize>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name` holding `data`, replacing any previous file.
    pub fn insert(&self, name: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(name.into(), Arc::new(Mutex::new(data.to_vec())));
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap();
        files.get(name).map(|data| data.lock().unwrap().clone())
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    /// Handles opened and not yet dropped.
    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

impl FileSystem for MemFs {
    fn create(&self, name: &str, initial_size: u32) -> bool {
        let mut files = self.files.lock().unwrap();
        if name.is_empty() || files.contains_key(name) {
            return false;
        }
        files.insert(name.into(), Arc::new(Mutex::new(vec![0; initial_size as usize])));
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().unwrap().remove(name).is_some()
    }

    fn open(&self, name: &str) -> Option<Box<dyn File>> {
        let data = self.files.lock().unwrap().get(name)?.clone();
        self.open.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(MemFile {
            data,
            pos: 0,
            open: self.open.clone(),
        }))
    }
}

struct MemFile {
    data: Contents,
    pos: usize,
    open: Arc<AtomicUsize>,
}

impl File for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let data = self.data.lock().unwrap();
        if self.pos >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Files do not grow; writes stop at the end.
    fn write(&mut self, buf: &[u8]) -> usize {
        let mut data = self.data.lock().unwrap();
        if self.pos >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - self.pos);
        data[self.pos..self.pos + n].copy_from_slice(&buf[..n]);
        self.pos += n;
        n
    }

    fn seek(&mut self, position: u32) {
        self.pos = position as usize;
    }

    fn tell(&self) -> u32 {
        self.pos as u32
    }

    fn length(&self) -> u32 {
        self.data.lock().unwrap().len() as u32
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Body of a test program. Its return value is passed to `exit` unless the
/// process already ended.
pub type Program = Arc<dyn Fn(&UserProc) -> i32 + Send + Sync>;

/// `Loader` that runs each child on a new std thread.
pub struct ThreadLoader {
    kernel: Weak<Kernel>,
    programs: HashMap<String, Program>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Loader for ThreadLoader {
    fn spawn(&self, request: SpawnRequest) -> Result<(), SpawnError> {
        let name = program_name(&request.cmd_line);
        if name.is_empty() {
            return Err(SpawnError::EmptyCommand);
        }
        let program = self.programs.get(name).cloned();
        let kernel = self.kernel.clone();

        let handle = thread::spawn(move || {
            let Some(kernel) = kernel.upgrade() else {
                return;
            };
            let Some(program) = program else {
                kernel.start_process(request, Err(LoadError::NotFound));
                return;
            };
            let Some(process) = kernel.start_process(request, Ok(Box::new(user_space()))) else {
                return;
            };
            let user = UserProc::new(kernel, process);
            let code = program(&user);
            if user.is_alive() {
                user.syscall(SYS_EXIT, &[code as u32]);
            }
        });
        self.threads.lock().unwrap().push(handle);
        Ok(())
    }
}

/// Page directory of every test process: data, read-only data, stack.
pub fn user_space() -> UserPageTable {
    let mut pt = UserPageTable::new();
    pt.map_range(VirtAddr::new(DATA_BASE), DATA_PAGES * PAGE_SIZE, PageFlags::USER_RW)
        .unwrap();
    pt.map(VirtAddr::new(RODATA_BASE), PageFlags::USER_RO).unwrap();
    pt.map(VirtAddr::new(STACK_PAGE), PageFlags::USER_RW).unwrap();
    pt
}

/// A user process driven from the thread that owns it.
pub struct UserProc {
    pub process: Arc<Process>,
    kernel: Arc<Kernel>,
    next_data: Cell<usize>,
    alive: Cell<bool>,
}

impl UserProc {
    fn new(kernel: Arc<Kernel>, process: Arc<Process>) -> Self {
        Self {
            process,
            kernel,
            next_data: Cell::new(DATA_BASE),
            alive: Cell::new(true),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// Write `bytes` at `addr`, ignoring page protection.
    pub fn poke(&self, addr: u32, bytes: &[u8]) {
        let mut space = self.process.space().lock();
        for (i, &byte) in bytes.iter().enumerate() {
            let addr = VirtAddr::new(addr as usize + i);
            let mapping = space.translate_mut(addr.align_down()).unwrap();
            mapping.frame[addr.page_offset()] = byte;
        }
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let space = self.process.space().lock();
        (0..len)
            .map(|i| {
                let addr = VirtAddr::new(addr as usize + i);
                space.translate(addr.align_down()).unwrap().frame[addr.page_offset()]
            })
            .collect()
    }

    /// Copy `bytes` into the data area and return their address.
    pub fn place(&self, bytes: &[u8]) -> u32 {
        let addr = self.next_data.get();
        assert!(addr + bytes.len() <= RODATA_BASE, "test data area exhausted");
        self.next_data.set(addr + bytes.len());
        self.poke(addr as u32, bytes);
        addr as u32
    }

    /// Place `s` with its NUL terminator.
    pub fn place_str(&self, s: &str) -> u32 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.place(&bytes)
    }

    /// Trap with the stack pointer at `esp`, whatever is there.
    pub fn trap(&self, esp: u32) -> (Disposition, i32) {
        let mut frame = InterruptFrame::syscall(esp);
        let disposition = self.kernel.handle_syscall(&mut frame);
        if disposition != Disposition::Resume {
            self.alive.set(false);
        }
        (disposition, frame.return_value())
    }

    /// Push `number` and `args` at `USER_ESP` and trap.
    pub fn syscall(&self, number: u32, args: &[u32]) -> (Disposition, i32) {
        let words: Vec<u8> = std::iter::once(number)
            .chain(args.iter().copied())
            .flat_map(u32::to_le_bytes)
            .collect();
        self.poke(USER_ESP as u32, &words);
        self.trap(USER_ESP as u32)
    }

    /// `syscall` for calls that must return to the process.
    pub fn call(&self, number: u32, args: &[u32]) -> i32 {
        let (disposition, value) = self.syscall(number, args);
        assert_eq!(disposition, Disposition::Resume, "syscall {} ended the process", number);
        value
    }
}

/// A kernel wired to test doubles.
pub struct Harness {
    pub kernel: Arc<Kernel>,
    pub console: Arc<RecordingConsole>,
    pub fs: Arc<MemFs>,
    pub fs_lock: Arc<FsLock>,
    loader: Arc<ThreadLoader>,
}

impl Harness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: KernelConfig::new(),
            programs: HashMap::new(),
            input: Vec::new(),
        }
    }

    /// Start a parentless process on the calling thread.
    pub fn init(&self, cmd_line: &str) -> UserProc {
        let process = self.kernel.start_init(cmd_line, Box::new(user_space()));
        UserProc::new(self.kernel.clone(), process)
    }

    /// Join every child thread started so far, re-raising their panics.
    pub fn join(&self) {
        loop {
            let handles: Vec<_> = self.loader.threads.lock().unwrap().drain(..).collect();
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(panic) = handle.join() {
                    std::panic::resume_unwind(panic);
                }
            }
        }
    }
}

pub struct HarnessBuilder {
    config: KernelConfig,
    programs: HashMap<String, Program>,
    input: Vec<u8>,
}

impl HarnessBuilder {
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a program `exec` can start by name.
    pub fn program(
        mut self,
        name: &str,
        body: impl Fn(&UserProc) -> i32 + Send + Sync + 'static,
    ) -> Self {
        self.programs.insert(name.into(), Arc::new(body));
        self
    }

    /// Keyboard input returned by `getc`.
    pub fn input(mut self, bytes: &[u8]) -> Self {
        self.input = bytes.to_vec();
        self
    }

    pub fn build(self) -> Harness {
        let sched = Arc::new(ThreadScheduler::new());
        let fs = Arc::new(MemFs::new());
        let fs_lock = Arc::new(FsLock::new());
        let console = Arc::new(RecordingConsole::with_input(&self.input));
        let loader_slot = RefCell::new(None);

        let kernel = Arc::new_cyclic(|weak| {
            let loader = Arc::new(ThreadLoader {
                kernel: weak.clone(),
                programs: self.programs,
                threads: Mutex::new(Vec::new()),
            });
            *loader_slot.borrow_mut() = Some(loader.clone());
            Kernel::new(
                self.config,
                Services {
                    scheduler: sched.clone(),
                    fs: fs.clone(),
                    fs_lock: fs_lock.clone(),
                    console: console.clone(),
                    loader,
                    machine: Arc::new(TestMachine),
                },
            )
        });

        Harness {
            kernel,
            console,
            fs,
            fs_lock,
            loader: loader_slot.into_inner().unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::syscall_entry;
    use crate::syscall::numbers::{SYS_HALT, SYS_WRITE};

    #[test]
    fn test_entry_resumes() {
        let h = Harness::new();
        let user = h.init("entry");
        let buf = user.place(b"ok");
        user.poke(USER_ESP as u32, &[SYS_WRITE, 1, buf, 2].map(u32::to_le_bytes).concat());

        let mut frame = InterruptFrame::syscall(USER_ESP as u32);
        syscall_entry(&h.kernel, &mut frame);
        assert_eq!(frame.return_value(), 2);
        assert_eq!(h.console.output(), "ok");
    }

    #[test]
    #[should_panic(expected = "machine powered off")]
    fn test_entry_halt_powers_off() {
        let h = Harness::new();
        let user = h.init("halter");
        user.poke(USER_ESP as u32, &SYS_HALT.to_le_bytes());
        syscall_entry(&h.kernel, &mut InterruptFrame::syscall(USER_ESP as u32));
    }

    #[test]
    #[should_panic(expected = "exited")]
    fn test_entry_exit_retires_thread() {
        let h = Harness::new();
        let user = h.init("quitter");
        user.poke(USER_ESP as u32, &[SYS_EXIT, 0].map(u32::to_le_bytes).concat());
        syscall_entry(&h.kernel, &mut InterruptFrame::syscall(USER_ESP as u32));
    }

    #[test]
    fn test_scheduler_keeps_early_wakeup() {
        let sched = ThreadScheduler::new();
        let me = sched.current();
        sched.unblock(me);
        sched.block();
        assert_eq!(sched.current(), me);
    }
}
