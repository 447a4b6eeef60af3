//! Shared helpers for engine tests
//!
//! `ScriptedHost` plays the debugger: it fills the parameter buffer when
//! asked and turns the completion transfer into an unwind the test catches.

#![allow(dead_code)]

use funceval_config::EngineConfig;
use funceval_runtime::wire::COMMAND_SIZE;
use funceval_runtime::{CompletionRecord, DebuggerCommand, DebuggerHost, FuncEvalEngine};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub use pretty_assertions::{assert_eq, assert_ne};

/// Payload carried out of `complete_func_eval`
#[derive(Debug, Clone, Copy)]
pub struct Completion(pub [u8; COMMAND_SIZE]);

/// Debugger stand-in with a canned request
#[derive(Debug)]
pub struct ScriptedHost {
    request: Mutex<Vec<u8>>,
    mode: Mutex<u32>,
    target: AtomicUsize,
    helper: AtomicUsize,
    events: Mutex<Vec<[u8; COMMAND_SIZE]>>,
}

impl ScriptedHost {
    pub fn new(mode: u32, request: Vec<u8>, target: usize) -> Arc<Self> {
        Arc::new(Self {
            request: Mutex::new(request),
            mode: Mutex::new(mode),
            target: AtomicUsize::new(target),
            helper: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        })
    }

    /// Queue the next evaluation
    pub fn script(&self, mode: u32, request: Vec<u8>, target: usize) {
        *self.request.lock().unwrap() = request;
        *self.mode.lock().unwrap() = mode;
        self.target.store(target, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<[u8; COMMAND_SIZE]> {
        self.events.lock().unwrap().clone()
    }

    pub fn registered_helper(&self) -> usize {
        self.helper.load(Ordering::SeqCst)
    }
}

impl DebuggerHost for ScriptedHost {
    fn parameter_buffer_size(&self) -> usize {
        self.request.lock().unwrap().len()
    }

    fn send_custom_event(&self, record: &[u8; COMMAND_SIZE]) {
        self.events.lock().unwrap().push(*record);
        if let Ok(DebuggerCommand::WriteParameterBuffer { buffer_address }) =
            DebuggerCommand::from_bytes(record)
        {
            let request = self.request.lock().unwrap();
            // SAFETY: the engine sized the buffer from `parameter_buffer_size`.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    request.as_ptr(),
                    buffer_address as usize as *mut u8,
                    request.len(),
                );
            }
        }
    }

    fn func_eval_mode(&self) -> u32 {
        *self.mode.lock().unwrap()
    }

    fn func_eval_target_address(&self) -> usize {
        self.target.load(Ordering::SeqCst)
    }

    fn register_func_eval_helper(&self, helper: usize) {
        self.helper.store(helper, Ordering::SeqCst);
    }

    fn complete_func_eval(&self, record: &[u8; COMMAND_SIZE]) -> ! {
        self.events.lock().unwrap().push(*record);
        panic::panic_any(Completion(*record))
    }
}

/// Engine with default configuration around `host`
pub fn engine(host: Arc<ScriptedHost>) -> FuncEvalEngine {
    FuncEvalEngine::new(host, &EngineConfig::default())
}

/// Drive `run` until control is handed to the debugger
pub fn run_to_completion(engine: &FuncEvalEngine) -> CompletionRecord {
    let payload = match panic::catch_unwind(AssertUnwindSafe(|| engine.run())) {
        Ok(_) => unreachable!("run returned"),
        Err(payload) => payload,
    };
    let Completion(bytes) = *payload
        .downcast::<Completion>()
        .unwrap_or_else(|_| panic!("engine panicked instead of completing"));

    match DebuggerCommand::from_bytes(&bytes).unwrap() {
        DebuggerCommand::Completion(record) => record,
        other => panic!("expected completion record, got {:?}", other),
    }
}
