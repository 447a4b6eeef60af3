//! The func-eval engine
//!
//! One evaluation runs start to finish on the thread the debugger hijacked:
//! ask the debugger for the request buffer, dispatch on the evaluation mode,
//! produce a value, pin it, and hand the completion record back. Errors at
//! any stage become a failure record instead of taking the process down.

use crate::error::{FuncEvalError, FuncEvalResult};
use crate::frame::CallFrame;
use crate::handles::{HandleId, HandleRegistry, HandleTable, ManagedValue, ValuePayload};
use crate::host::DebuggerHost;
use crate::invoke::{CallConverter, DynamicCallSignature, FfiCallConverter};
use crate::journal::{EvalEvent, EvalJournal, MemoryJournal, NullJournal};
use crate::types::{ElementType, SignatureResolver, TypeDesc, TypeLoader, TypeResolver};
use crate::wire::{CompletionRecord, DebuggerCommand, FuncEvalRequest};
use funceval_config::{EngineConfig, LimitsConfig};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// What the debugger asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FuncEvalMode {
    /// Decode, resolve, build and invoke
    RegularFuncEval = 1,
    /// Turn the raw buffer into a string value
    NewStringWithLength = 2,
}

impl TryFrom<u32> for FuncEvalMode {
    type Error = FuncEvalError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(FuncEvalMode::RegularFuncEval),
            2 => Ok(FuncEvalMode::NewStringWithLength),
            other => Err(FuncEvalError::UnsupportedMode(other)),
        }
    }
}

/// Stage of a single evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalPhase {
    AwaitingBuffer,
    Decoding,
    Resolving,
    Building,
    Invoking,
    StringSynthesis,
    Registering,
    Completed,
    Failed,
}

impl EvalPhase {
    /// Whether the evaluation has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, EvalPhase::Completed | EvalPhase::Failed)
    }

    /// Whether `next` may follow `self`
    pub fn can_advance_to(self, next: EvalPhase) -> bool {
        use EvalPhase::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (AwaitingBuffer, Decoding)
            | (Decoding, Resolving)
            | (Decoding, StringSynthesis)
            | (Resolving, Building)
            | (Building, Invoking)
            | (Invoking, Registering)
            | (StringSynthesis, Registering)
            | (Registering, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EvalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
struct PhaseTracker {
    phase: EvalPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: EvalPhase::AwaitingBuffer,
        }
    }

    fn advance(&mut self, next: EvalPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal func-eval transition {} -> {}",
            self.phase,
            next
        );
        trace!(from = %self.phase, to = %next, "func-eval phase");
        self.phase = next;
    }
}

/// Debugger-driven function evaluation
pub struct FuncEvalEngine {
    host: Arc<dyn DebuggerHost>,
    types: Arc<dyn TypeResolver>,
    converter: Arc<dyn CallConverter>,
    handles: Arc<dyn HandleRegistry>,
    journal: Arc<dyn EvalJournal>,
    limits: LimitsConfig,
}

impl fmt::Debug for FuncEvalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncEvalEngine")
            .field("handles", &self.handles.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl FuncEvalEngine {
    /// Engine with the built-in type loader, libffi invoker and handle table
    pub fn new(host: Arc<dyn DebuggerHost>, config: &EngineConfig) -> Self {
        let journal: Arc<dyn EvalJournal> = if config.journal.enabled {
            Arc::new(MemoryJournal::new(config.journal.capacity))
        } else {
            Arc::new(NullJournal)
        };

        Self {
            host,
            types: Arc::new(TypeLoader::new()),
            converter: Arc::new(FfiCallConverter::new()),
            handles: Arc::new(HandleTable::new()),
            journal,
            limits: config.limits.clone(),
        }
    }

    /// Replace the type-system collaborator
    pub fn with_types(mut self, types: Arc<dyn TypeResolver>) -> Self {
        self.types = types;
        self
    }

    /// Replace the calling-convention collaborator
    pub fn with_converter(mut self, converter: Arc<dyn CallConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Replace the handle registry
    pub fn with_handles(mut self, handles: Arc<dyn HandleRegistry>) -> Self {
        self.handles = handles;
        self
    }

    /// Replace the journal
    pub fn with_journal(mut self, journal: Arc<dyn EvalJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn types(&self) -> &Arc<dyn TypeResolver> {
        &self.types
    }

    pub fn handles(&self) -> &Arc<dyn HandleRegistry> {
        &self.handles
    }

    pub fn journal(&self) -> &Arc<dyn EvalJournal> {
        &self.journal
    }

    /// Run one evaluation and hand the result to the debugger
    pub fn run(&self) -> ! {
        let record = self.evaluate();
        self.return_to_debugger(record)
    }

    /// Send the completion record; control never comes back
    pub fn return_to_debugger(&self, record: CompletionRecord) -> ! {
        debug!(handle = record.handle(), "returning to debugger");
        self.host.complete_func_eval(&record.to_bytes())
    }

    /// Run one evaluation and produce its completion record
    ///
    /// Everything [`run`](Self::run) does short of transferring control.
    pub fn evaluate(&self) -> CompletionRecord {
        let mut phase = PhaseTracker::new();
        match self.evaluate_in(&mut phase) {
            Ok(record) => {
                phase.advance(EvalPhase::Completed);
                record
            }
            Err(err) => {
                phase.advance(EvalPhase::Failed);
                warn!(code = err.diagnostic_code(), error = %err, "func-eval failed");
                self.journal.record(EvalEvent::Failed {
                    code: err.diagnostic_code(),
                    message: err.to_string(),
                });
                CompletionRecord::failed(&err)
            }
        }
    }

    /// Unpin a value on the debugger's request
    pub fn release_handle(&self, id: HandleId) -> Option<ManagedValue> {
        let released = self.handles.release(id);
        if released.is_some() {
            self.journal.record(EvalEvent::released(id));
        }
        released
    }

    fn evaluate_in(&self, phase: &mut PhaseTracker) -> FuncEvalResult<CompletionRecord> {
        let buffer = self.fill_parameter_buffer()?;
        phase.advance(EvalPhase::Decoding);

        match FuncEvalMode::try_from(self.host.func_eval_mode())? {
            FuncEvalMode::RegularFuncEval => self.regular_func_eval(&buffer, phase),
            FuncEvalMode::NewStringWithLength => self.new_string_with_length(&buffer, phase),
        }
    }

    fn fill_parameter_buffer(&self) -> FuncEvalResult<Vec<u8>> {
        let size = self.host.parameter_buffer_size();
        if size > self.limits.max_parameter_buffer {
            return Err(FuncEvalError::malformed(
                0,
                format!(
                    "parameter buffer of {} bytes exceeds limit {}",
                    size, self.limits.max_parameter_buffer
                ),
            ));
        }

        let mut buffer = vec![0u8; size];
        let command = DebuggerCommand::WriteParameterBuffer {
            buffer_address: buffer.as_mut_ptr() as u64,
        };
        trace!(size, "requesting parameter buffer");
        self.host.send_custom_event(&command.to_bytes());
        Ok(buffer)
    }

    fn regular_func_eval(
        &self,
        buffer: &[u8],
        phase: &mut PhaseTracker,
    ) -> FuncEvalResult<CompletionRecord> {
        let request = FuncEvalRequest::decode(buffer, &self.limits)?;
        debug!(
            param_count = request.parameters().len(),
            type_references = request.type_references().len(),
            "decoded func-eval request"
        );

        phase.advance(EvalPhase::Resolving);
        let constructed_before = self.types.constructed_count();
        let signature = SignatureResolver::new(self.types.as_ref()).resolve(&request)?;
        let constructed = self
            .types
            .constructed_count()
            .saturating_sub(constructed_before);
        if constructed > 0 {
            self.journal
                .record(EvalEvent::TypesConstructed { count: constructed });
        }

        phase.advance(EvalPhase::Building);
        let mut frame = CallFrame::build(&signature, request.parameters())?;
        drop(request);

        phase.advance(EvalPhase::Invoking);
        let target = self.host.func_eval_target_address();
        let dynamic = DynamicCallSignature::from_resolved(&signature);
        // SAFETY: the debugger resolved `target` for exactly this signature
        // and supplied the argument bytes; it owns the consequences of a
        // mismatch, as with any func-eval.
        unsafe { self.converter.invoke(target, &dynamic, &mut frame) }?;

        phase.advance(EvalPhase::Registering);
        let returned = signature.return_entry();
        let value = ManagedValue::from_return_slot(
            returned.handle,
            &returned.layout,
            frame.return_slot(),
        );
        let record = self.register(value)?;
        self.journal.record(EvalEvent::CallCompleted {
            target: target as u64,
            arguments: signature.arguments().len(),
            handle: record.handle(),
        });
        Ok(record)
    }

    fn new_string_with_length(
        &self,
        buffer: &[u8],
        phase: &mut PhaseTracker,
    ) -> FuncEvalResult<CompletionRecord> {
        phase.advance(EvalPhase::StringSynthesis);
        let units = decode_utf16(buffer);
        let string_type = self
            .types
            .try_resolve(&TypeDesc::Primitive(ElementType::String))
            .ok_or_else(|| FuncEvalError::unresolved("string type is not available"))?;
        let length = units.len();

        phase.advance(EvalPhase::Registering);
        let record = self.register(Some(ManagedValue::new(
            string_type,
            ValuePayload::Text(units),
        )))?;
        self.journal.record(EvalEvent::StringMaterialized {
            length,
            handle: record.handle(),
        });
        Ok(record)
    }

    fn register(&self, value: Option<ManagedValue>) -> FuncEvalResult<CompletionRecord> {
        match value {
            None => {
                debug!("func-eval produced no value");
                Ok(CompletionRecord::NULL)
            }
            Some(value) => {
                let (id, address) = self.handles.register(value)?;
                Ok(CompletionRecord::Completed {
                    handle: id.raw(),
                    address,
                })
            }
        }
    }
}

/// Read a little-endian UTF-16 buffer as string code units
///
/// Never fails: unpaired surrogates and a trailing odd byte each become
/// U+FFFD.
fn decode_utf16(bytes: &[u8]) -> Vec<u16> {
    let pairs = bytes.chunks_exact(2);
    let odd_tail = !pairs.remainder().is_empty();
    let raw = pairs.map(|pair| u16::from_le_bytes([pair[0], pair[1]]));

    let mut units = Vec::with_capacity(bytes.len() / 2 + 1);
    let mut buf = [0u16; 2];
    for decoded in char::decode_utf16(raw) {
        let c = decoded.unwrap_or(char::REPLACEMENT_CHARACTER);
        units.extend_from_slice(c.encode_utf16(&mut buf));
    }
    if odd_tail {
        units.push(char::REPLACEMENT_CHARACTER as u16);
    }
    units
}

static ENGINE: OnceLock<FuncEvalEngine> = OnceLock::new();

/// Install the process engine and register the debugger entry point
///
/// Call once at startup. Later calls leave the first engine in place and
/// report [`FuncEvalError::AlreadyInitialized`].
pub fn initialize(engine: FuncEvalEngine) -> FuncEvalResult<&'static FuncEvalEngine> {
    ENGINE
        .set(engine)
        .map_err(|_| FuncEvalError::AlreadyInitialized)?;
    let engine = ENGINE.get().ok_or(FuncEvalError::AlreadyInitialized)?;
    engine
        .host
        .register_func_eval_helper(func_eval_helper as usize);
    debug!("func-eval helper registered");
    Ok(engine)
}

/// The installed engine, if any
pub fn installed() -> Option<&'static FuncEvalEngine> {
    ENGINE.get()
}

/// Entry point the debugger-notification path calls
pub extern "C" fn func_eval_helper() -> ! {
    match ENGINE.get() {
        Some(engine) => engine.run(),
        // Nothing to report through without an engine.
        None => std::process::abort(),
    }
}
