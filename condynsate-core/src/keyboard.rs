/*!
Keyboard state tracked by a background listener.

A [`KeySource`] produces press and release events. The listener thread polls it
every few milliseconds and keeps the set of keys and modifiers currently held,
which the main thread queries with [`Keyboard::is_pressed`] and
[`Keyboard::get_pressed`].

Key combinations are written with the modifiers first, in the fixed order
`shift`, `ctrl`, `alt`, `cmd`, then the key: `"a"`, `"shift+a"`,
`"ctrl+alt+space"`. Characters are normalized to their unshifted qwerty key, so
holding shift and typing `!` reads as `"shift+1"`.
*/

use std::{sync::Arc, time::Duration};

use condynsate_macros::{EnumToString, ToVec};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    logger::{is_enabled, InternalLog},
    shutdown::Terminate,
    utils::{
        enum_tools::ToVec,
        frame_clock::FrameClock,
        worker::{TickOutcome, Worker, WorkerTask},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumToString, ToVec)]
pub enum Modifier {
    Shift,
    Ctrl,
    Alt,
    Cmd,
}

impl Modifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modifier::Shift => "shift",
            Modifier::Ctrl => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Cmd => "cmd",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Modifier::to_vec().into_iter().find(|m| m.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    /// Non printable key, by lower case name: `space`, `enter`, `esc`, `up`...
    Named(String),
    Modifier(Modifier),
}

impl Key {
    /// Name used in key combinations.
    pub fn name(&self) -> String {
        match self {
            Key::Char(' ') => "space".to_string(),
            Key::Char(c) => c.to_string(),
            Key::Named(name) => name.clone(),
            Key::Modifier(m) => m.as_str().to_string(),
        }
    }

    /// Maps shifted and control characters back to the key that produced them.
    pub fn normalized(self) -> Self {
        match self {
            Key::Char('\t') => Key::Named("tab".to_string()),
            Key::Char('\n' | '\r') => Key::Named("enter".to_string()),
            Key::Char(c) => Key::Char(unshift(c)),
            Key::Named(name) => Key::Named(name.to_lowercase()),
            other => other,
        }
    }
}

fn unshift(c: char) -> char {
    match c {
        '\u{1}'..='\u{1a}' => (b'a' + (c as u8) - 1) as char,
        '~' => '`',
        '!' => '1',
        '@' => '2',
        '#' => '3',
        '$' => '4',
        '%' => '5',
        '^' => '6',
        '&' => '7',
        '*' => '8',
        '(' => '9',
        ')' => '0',
        '_' => '-',
        '+' => '=',
        '{' => '[',
        '}' => ']',
        '|' => '\\',
        ':' => ';',
        '"' => '\'',
        '<' => ',',
        '>' => '.',
        '?' => '/',
        c => c.to_ascii_lowercase(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Press,
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub kind: KeyEventKind,
}

/// Producer of key events, polled by the listener thread.
pub trait KeySource: Send + 'static {
    /// Next pending event, waiting at most `timeout`.
    ///
    /// ## Errors
    /// `TransportClosed` once the source can no longer produce events.
    fn next_event(&mut self, timeout: Duration) -> CondynsateResult<Option<KeyEvent>>;
}

/// [`KeySource`] fed through a channel, from another thread or a test.
#[derive(Debug)]
pub struct ChannelKeySource {
    rx: Receiver<KeyEvent>,
}

/// Sending half of a [`ChannelKeySource`].
#[derive(Debug, Clone)]
pub struct KeySender {
    tx: Sender<KeyEvent>,
}

impl ChannelKeySource {
    pub fn new() -> (KeySender, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (KeySender { tx }, Self { rx })
    }
}

impl KeySource for ChannelKeySource {
    fn next_event(&mut self, timeout: Duration) -> CondynsateResult<Option<KeyEvent>> {
        let closed = || {
            CondynsateError::new(
                CondynsateErrorTypes::TransportClosed,
                "Key event channel disconnected".to_string(),
            )
        };
        if timeout.is_zero() {
            return match self.rx.try_recv() {
                Ok(event) => Ok(Some(event)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(closed()),
            };
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(closed()),
        }
    }
}

impl KeySender {
    pub fn send(&self, event: KeyEvent) -> CondynsateResult<()> {
        self.tx.send(event).map_err(|_| {
            CondynsateError::new(
                CondynsateErrorTypes::TransportClosed,
                "Keyboard listener is gone".to_string(),
            )
        })
    }

    pub fn press(&self, key: Key) -> CondynsateResult<()> {
        self.send(KeyEvent {
            key,
            kind: KeyEventKind::Press,
        })
    }

    pub fn release(&self, key: Key) -> CondynsateResult<()> {
        self.send(KeyEvent {
            key,
            kind: KeyEventKind::Release,
        })
    }
}

/// Keys held right now. Keys are kept in press order.
#[derive(Debug, Default, Clone)]
struct PressedKeys {
    keys: Vec<Key>,
    modifiers: Vec<Modifier>,
}

impl PressedKeys {
    fn apply(&mut self, event: KeyEvent) {
        match (event.key.normalized(), event.kind) {
            (Key::Modifier(m), KeyEventKind::Press) => {
                if !self.modifiers.contains(&m) {
                    self.modifiers.push(m);
                    self.modifiers.sort();
                }
            }
            (Key::Modifier(m), KeyEventKind::Release) => self.modifiers.retain(|x| *x != m),
            (key, KeyEventKind::Press) => {
                if !self.keys.contains(&key) {
                    self.keys.push(key);
                }
            }
            (key, KeyEventKind::Release) => self.keys.retain(|x| *x != key),
        }
    }

    fn combos(&self) -> Vec<String> {
        let prefix: String = self
            .modifiers
            .iter()
            .map(|m| format!("{}+", m.as_str()))
            .collect();
        if self.keys.is_empty() {
            return self.modifiers.iter().map(|m| m.as_str().to_string()).collect();
        }
        self.keys
            .iter()
            .map(|k| format!("{prefix}{}", k.name()))
            .collect()
    }
}

/// Rewrites a user combination in canonical order, `None` when malformed.
pub fn canonical_combo(combo: &str) -> Option<String> {
    let parts: Vec<&str> = combo.split('+').map(|p| p.trim()).collect();
    let (key, modifiers) = match parts.split_last() {
        Some((key, modifiers)) if !key.is_empty() => (key.to_lowercase(), modifiers),
        _ => return None,
    };
    let mut mods = Vec::new();
    for m in modifiers {
        if m.is_empty() {
            continue;
        }
        mods.push(Modifier::parse(&m.to_lowercase())?);
    }
    mods.sort();
    mods.dedup();
    let key = match key.chars().count() {
        1 => key.chars().next().map(unshift).map(String::from)?,
        _ => key,
    };
    let mut out: String = mods.iter().map(|m| format!("{}+", m.as_str())).collect();
    out.push_str(&key);
    Some(out)
}

struct KeyListener {
    source: Box<dyn KeySource>,
    pressed: Arc<Mutex<PressedKeys>>,
}

impl WorkerTask for KeyListener {
    fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::Idle;
        loop {
            match self.source.next_event(Duration::ZERO) {
                Ok(Some(event)) => {
                    if is_enabled(InternalLog::Keyboard) {
                        debug!("Key event {:?}", event);
                    }
                    self.pressed.lock().apply(event);
                    outcome = TickOutcome::Worked;
                }
                Ok(None) => return outcome,
                Err(e) if e.error_type() == CondynsateErrorTypes::TransportClosed => {
                    return TickOutcome::Closed;
                }
                Err(e) => {
                    warn!("Key source error: {}", e.detailed_error());
                    return outcome;
                }
            }
        }
    }
}

#[derive(Debug)]
struct KeyboardCore {
    pressed: Arc<Mutex<PressedKeys>>,
    worker: Worker,
}

impl Terminate for KeyboardCore {
    fn name(&self) -> &str {
        "keyboard"
    }

    fn terminate(&self) -> CondynsateResult<()> {
        self.worker.terminate()?;
        if self.worker.transport_closed() {
            warn!("Keyboard source closed before the keyboard was terminated");
        }
        self.pressed.lock().keys.clear();
        self.pressed.lock().modifiers.clear();
        Ok(())
    }
}

pub struct Keyboard {
    core: Arc<KeyboardCore>,
}

impl Keyboard {
    /// Starts listening to `source` on the `condynsate-keyboard` thread.
    pub fn new(source: Box<dyn KeySource>) -> CondynsateResult<Self> {
        let pressed = Arc::new(Mutex::new(PressedKeys::default()));
        let worker = Worker::spawn(
            "condynsate-keyboard",
            KeyListener {
                source,
                pressed: pressed.clone(),
            },
            FrameClock::unthrottled(),
        )?;
        Ok(Self {
            core: Arc::new(KeyboardCore { pressed, worker }),
        })
    }

    /// Handle used by the shutdown registry.
    pub fn terminate_handle(&self) -> Arc<dyn Terminate> {
        self.core.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.core.worker.is_done()
    }

    /// `true` if the combination, such as `"shift+a"`, is held right now.
    pub fn is_pressed(&self, combo: &str) -> bool {
        let Some(combo) = canonical_combo(combo) else {
            warn!("\"{combo}\" is not a valid key combination");
            return false;
        };
        self.core.pressed.lock().combos().contains(&combo)
    }

    /// Every combination held right now.
    pub fn get_pressed(&self) -> Vec<String> {
        self.core.pressed.lock().combos()
    }

    /// Stops the listener thread. Idempotent.
    pub fn terminate(&self) -> CondynsateResult<()> {
        self.core.terminate()
    }
}
