//! Binding of template variables onto a live engine instance.
//!
//! The adapter keeps exactly one live setter per variable id. A resolution/composition switch
//! resets the engine, which invalidates every setter of the previous instance; the adapter then
//! rebuilds the whole setter table against the new instance in one step.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::foundation::core::Resolution;
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::session::SessionLock;
use crate::surface::SurfaceHandle;

/// State machine played when a composition does not name one.
pub const DEFAULT_STATE_MACHINE: &str = "State Machine 1";

/// Narrow capability interface of the external animation engine.
///
/// Implementations own the real runtime; this crate only drives it.
pub trait EngineInstance: Send {
    /// Start or resume `state_machine`.
    fn play(&mut self, state_machine: &str) -> CaptureResult<()>;
    /// Freeze at the current time.
    fn pause(&mut self);
    /// Rewind to time 0.
    fn stop(&mut self);
    /// Destroy the current instance state and re-initialize from `cfg`.
    fn reset(&mut self, cfg: &ResetConfig) -> CaptureResult<()>;
    /// Write a string at a view-model path.
    fn set_string(&mut self, path: &str, value: &str) -> CaptureResult<()>;
    /// Write a number at a view-model path.
    fn set_number(&mut self, path: &str, value: f32) -> CaptureResult<()>;
    /// Write a boolean at a view-model path.
    fn set_boolean(&mut self, path: &str, value: bool) -> CaptureResult<()>;
}

/// Parameters of an engine reset.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetConfig {
    /// Composition to load.
    pub artboard: String,
    /// State machine to attach.
    pub state_machine: String,
    /// Start playing right after the reset.
    pub autoplay: bool,
    /// Bind the default view model instance.
    pub auto_bind: bool,
}

impl ResetConfig {
    /// Reset into `artboard` with the default state machine, autoplaying.
    pub fn for_composition(artboard: impl Into<String>) -> Self {
        Self {
            artboard: artboard.into(),
            state_machine: DEFAULT_STATE_MACHINE.to_string(),
            autoplay: true,
            auto_bind: true,
        }
    }
}

/// Value shape a binding accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    /// Text.
    String,
    /// Floating-point number.
    Number,
    /// Flag.
    Boolean,
    /// Index into a fixed set of options, written as a number.
    Selector,
}

/// Association of a template variable with a value path inside the engine's view model.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableBinding {
    /// Template variable id.
    pub id: String,
    /// Accepted value shape.
    pub kind: VariableKind,
    /// Path inside the engine's view model.
    pub engine_value_path: String,
}

impl VariableBinding {
    /// Binding of `id` onto `path`.
    pub fn new(id: impl Into<String>, kind: VariableKind, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            engine_value_path: path.into(),
        }
    }
}

/// A value pushed through a binding.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    /// Flag value.
    Boolean(bool),
    /// Number value.
    Number(f32),
    /// Text value.
    String(String),
    /// Option index.
    Selector(u32),
}

impl VariableValue {
    /// Convert to the value shape a binding of `kind` accepts.
    ///
    /// Selectors arrive as plain numbers on the wire and are accepted when integral.
    pub fn coerce_to(&self, kind: VariableKind) -> CaptureResult<Self> {
        match (kind, self) {
            (VariableKind::String, Self::String(_))
            | (VariableKind::Number, Self::Number(_))
            | (VariableKind::Boolean, Self::Boolean(_))
            | (VariableKind::Selector, Self::Selector(_)) => Ok(self.clone()),
            (VariableKind::Number, Self::Selector(i)) => Ok(Self::Number(*i as f32)),
            (VariableKind::Selector, Self::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                Ok(Self::Selector(*n as u32))
            }
            (kind, value) => Err(CaptureError::binding(format!(
                "value {value:?} does not fit a {kind:?} binding"
            ))),
        }
    }
}

type SetterFn = Box<dyn Fn(&mut dyn EngineInstance, &VariableValue) -> CaptureResult<()> + Send>;

/// The one reachable setter for a binding id. Rebuilt wholesale on every engine reset.
struct LiveSetter {
    binding: VariableBinding,
    apply: SetterFn,
    last_value: Option<VariableValue>,
}

fn make_setter(binding: &VariableBinding) -> SetterFn {
    let path = binding.engine_value_path.clone();
    Box::new(move |engine, value| match value {
        VariableValue::String(s) => engine.set_string(&path, s),
        VariableValue::Number(n) => engine.set_number(&path, *n),
        VariableValue::Boolean(b) => engine.set_boolean(&path, *b),
        VariableValue::Selector(i) => engine.set_number(&path, *i as f32),
    })
}

/// Adapter shared between UI controls and capture sessions.
pub type SharedEngine = Arc<Mutex<EngineBindingAdapter>>;

/// Wrap an adapter for sharing with recorders.
pub fn shared(adapter: EngineBindingAdapter) -> SharedEngine {
    Arc::new(Mutex::new(adapter))
}

pub(crate) fn lock_engine(
    engine: &SharedEngine,
) -> CaptureResult<MutexGuard<'_, EngineBindingAdapter>> {
    engine
        .lock()
        .map_err(|_| CaptureError::Other(anyhow::anyhow!("engine adapter mutex poisoned")))
}

/// A resolution/composition change waiting for the engine to be free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionChange {
    /// New surface size.
    pub resolution: Resolution,
    /// Composition to reset into.
    pub composition: String,
}

/// Keeps one live engine instance consistent with the selected composition and variable values.
pub struct EngineBindingAdapter {
    engine: Box<dyn EngineInstance>,
    surface: Option<SurfaceHandle>,
    setters: BTreeMap<String, LiveSetter>,
    generation: u64,
    state_machine: String,
    composition: Option<String>,
    pending: Option<ResolutionChange>,
    lock: SessionLock,
}

impl EngineBindingAdapter {
    /// Adapter over `engine` with no surface and no bindings.
    pub fn new(engine: Box<dyn EngineInstance>) -> Self {
        Self {
            engine,
            surface: None,
            setters: BTreeMap::new(),
            generation: 0,
            state_machine: DEFAULT_STATE_MACHINE.to_string(),
            composition: None,
            pending: None,
            lock: SessionLock::default(),
        }
    }

    /// Lock shared with every recorder driving this engine.
    pub fn session_lock(&self) -> SessionLock {
        self.lock.clone()
    }

    /// Attach the surface the engine draws into.
    pub fn attach_surface(&mut self, surface: SurfaceHandle) {
        self.surface = Some(surface);
    }

    /// Detach and return the surface.
    pub fn detach_surface(&mut self) -> Option<SurfaceHandle> {
        self.surface.take()
    }

    /// The attached surface, if any.
    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.surface.clone()
    }

    /// Monotonic id of the current engine instance; bumped by every reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Composition of the last reset.
    pub fn composition(&self) -> Option<&str> {
        self.composition.as_deref()
    }

    /// State machine `play` starts.
    pub fn state_machine(&self) -> &str {
        &self.state_machine
    }

    /// State machine used by `play` and by the next reset.
    pub fn set_state_machine(&mut self, name: impl Into<String>) {
        self.state_machine = name.into();
    }

    /// Number of live setters.
    pub fn binding_count(&self) -> usize {
        self.setters.len()
    }

    /// Whether `id` has a live setter.
    pub fn is_bound(&self, id: &str) -> bool {
        self.setters.contains_key(id)
    }

    /// Register or replace the live setter for `binding.id`.
    pub fn bind(&mut self, binding: VariableBinding) {
        let apply = make_setter(&binding);
        let id = binding.id.clone();
        let replaced = self.setters.insert(
            id.clone(),
            LiveSetter {
                binding,
                apply,
                last_value: None,
            },
        );
        tracing::debug!(%id, replaced = replaced.is_some(), "bound variable");
    }

    /// Drop the setter of `id`. Returns whether one existed.
    pub fn unbind(&mut self, id: &str) -> bool {
        self.setters.remove(id).is_some()
    }

    /// Push a value through the live setter of `id`.
    pub fn set_value(&mut self, id: &str, value: VariableValue) -> CaptureResult<()> {
        let setter = self
            .setters
            .get_mut(id)
            .ok_or_else(|| CaptureError::binding(format!("no binding registered for '{id}'")))?;
        let value = value.coerce_to(setter.binding.kind)?;
        (setter.apply)(self.engine.as_mut(), &value)?;
        setter.last_value = Some(value);
        Ok(())
    }

    /// Play the current state machine.
    pub fn play(&mut self) -> CaptureResult<()> {
        self.engine.play(&self.state_machine)
    }

    /// Pause the engine.
    pub fn pause(&mut self) {
        self.engine.pause();
    }

    /// Rewind the engine to time 0.
    pub fn stop(&mut self) {
        self.engine.stop();
    }

    /// Destructively re-initialize the engine for a new size/composition.
    ///
    /// Rejected with [`CaptureError::Busy`] while a capture session holds the engine.
    pub fn switch_resolution(
        &mut self,
        resolution: Resolution,
        composition: impl Into<String>,
    ) -> CaptureResult<()> {
        if self.lock.is_held() {
            return Err(CaptureError::busy(
                "resolution switch rejected while a capture is in progress",
            ));
        }
        self.apply_switch(ResolutionChange {
            resolution,
            composition: composition.into(),
        })
    }

    /// Switch now when the engine is free, otherwise queue the change for the next capture.
    ///
    /// Returns `true` when the switch was applied immediately.
    pub fn request_resolution(
        &mut self,
        resolution: Resolution,
        composition: impl Into<String>,
    ) -> CaptureResult<bool> {
        let change = ResolutionChange {
            resolution,
            composition: composition.into(),
        };
        if self.lock.is_held() {
            tracing::debug!(resolution = %change.resolution, "queued resolution change");
            self.pending = Some(change);
            return Ok(false);
        }
        self.apply_switch(change)?;
        Ok(true)
    }

    /// Change queued behind an active capture.
    pub fn pending_change(&self) -> Option<&ResolutionChange> {
        self.pending.as_ref()
    }

    /// Apply a queued change. Called by the capture session during preparation, before sampling.
    pub(crate) fn apply_pending(&mut self) -> CaptureResult<bool> {
        match self.pending.take() {
            Some(change) => {
                self.apply_switch(change)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn apply_switch(&mut self, change: ResolutionChange) -> CaptureResult<()> {
        let cfg = ResetConfig {
            state_machine: self.state_machine.clone(),
            ..ResetConfig::for_composition(change.composition.clone())
        };
        self.engine.reset(&cfg)?;
        self.composition = Some(change.composition);

        // The whole table is swapped at once; no setter of the old generation stays reachable.
        let old = std::mem::take(&mut self.setters);
        self.generation += 1;

        if let Some(surface) = &self.surface {
            surface.resize(change.resolution);
        }

        for (id, prev) in old {
            let apply = make_setter(&prev.binding);
            let mut live = LiveSetter {
                binding: prev.binding,
                apply,
                last_value: None,
            };
            if let Some(value) = prev.last_value {
                match (live.apply)(self.engine.as_mut(), &value) {
                    Ok(()) => live.last_value = Some(value),
                    Err(e) => tracing::warn!(%id, error = %e, "failed to replay value after reset"),
                }
            }
            self.setters.insert(id, live);
        }

        tracing::info!(
            resolution = %change.resolution,
            generation = self.generation,
            bindings = self.setters.len(),
            "engine re-initialized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        resets: Vec<ResetConfig>,
        sets: Vec<(usize, String, String)>,
    }

    struct FakeEngine {
        instance: usize,
        log: Arc<Mutex<Log>>,
    }

    impl FakeEngine {
        fn record(&self, path: &str, v: String) {
            self.log
                .lock()
                .unwrap()
                .sets
                .push((self.instance, path.to_string(), v));
        }
    }

    impl EngineInstance for FakeEngine {
        fn play(&mut self, _state_machine: &str) -> CaptureResult<()> {
            Ok(())
        }
        fn pause(&mut self) {}
        fn stop(&mut self) {}
        fn reset(&mut self, cfg: &ResetConfig) -> CaptureResult<()> {
            self.instance += 1;
            self.log.lock().unwrap().resets.push(cfg.clone());
            Ok(())
        }
        fn set_string(&mut self, path: &str, value: &str) -> CaptureResult<()> {
            self.record(path, value.to_string());
            Ok(())
        }
        fn set_number(&mut self, path: &str, value: f32) -> CaptureResult<()> {
            self.record(path, value.to_string());
            Ok(())
        }
        fn set_boolean(&mut self, path: &str, value: bool) -> CaptureResult<()> {
            self.record(path, value.to_string());
            Ok(())
        }
    }

    fn adapter() -> (EngineBindingAdapter, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let engine = FakeEngine {
            instance: 0,
            log: log.clone(),
        };
        (EngineBindingAdapter::new(Box::new(engine)), log)
    }

    #[test]
    fn rebinding_same_id_replaces_setter() {
        let (mut a, log) = adapter();
        a.bind(VariableBinding::new("title", VariableKind::String, "old/title"));
        a.bind(VariableBinding::new("title", VariableKind::String, "new/title"));
        assert_eq!(a.binding_count(), 1);

        a.set_value("title", VariableValue::String("hi".into()))
            .unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.sets, vec![(0, "new/title".to_string(), "hi".to_string())]);
    }

    #[test]
    fn switch_replays_last_values_into_new_instance() {
        let (mut a, log) = adapter();
        a.bind(VariableBinding::new("hue", VariableKind::Number, "hue"));
        a.set_value("hue", VariableValue::Number(0.5)).unwrap();

        a.switch_resolution(Resolution::new(320, 240).unwrap(), "Square")
            .unwrap();
        assert_eq!(a.generation(), 1);
        assert_eq!(a.composition(), Some("Square"));

        let log = log.lock().unwrap();
        assert_eq!(log.resets.len(), 1);
        assert_eq!(log.resets[0].artboard, "Square");
        assert!(log.resets[0].autoplay && log.resets[0].auto_bind);
        assert_eq!(log.sets.last().unwrap().0, 1);
    }

    #[test]
    fn switch_is_rejected_while_locked_and_queued_by_request() {
        let (mut a, _log) = adapter();
        let lock = a.session_lock();
        let guard = lock.try_acquire().unwrap();

        let res = Resolution::new(100, 100).unwrap();
        let err = a.switch_resolution(res, "A").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Busy);

        assert!(!a.request_resolution(res, "A").unwrap());
        assert!(a.pending_change().is_some());
        assert_eq!(a.generation(), 0);

        drop(guard);
        assert!(a.apply_pending().unwrap());
        assert_eq!(a.generation(), 1);
        assert!(a.pending_change().is_none());
    }

    #[test]
    fn kind_mismatch_is_a_binding_error() {
        let (mut a, _log) = adapter();
        a.bind(VariableBinding::new("flag", VariableKind::Boolean, "flag"));
        let err = a
            .set_value("flag", VariableValue::String("yes".into()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Binding);
        assert!(a.set_value("missing", VariableValue::Boolean(true)).is_err());
    }

    #[test]
    fn selector_accepts_integral_numbers() {
        assert_eq!(
            VariableValue::Number(2.0)
                .coerce_to(VariableKind::Selector)
                .unwrap(),
            VariableValue::Selector(2)
        );
        assert!(
            VariableValue::Number(1.5)
                .coerce_to(VariableKind::Selector)
                .is_err()
        );
    }
}
