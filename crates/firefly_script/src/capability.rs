//! Native capability bridge
//!
//! The capability table maps primitive names to native handlers and is
//! installed into the runtime's global namespace once at boot. Handlers
//! marshal engine values through bounded string buffers and act on the
//! shared native endpoints (console sink, light pin). Neither handler
//! throws back into the engine except for the documented argument-count
//! contract on `switch_light`.

use std::sync::{Arc, Mutex};

use firefly_hal::console::TextSink;
use firefly_hal::gpio::{DigitalPin, PinLevel};
use rquickjs::prelude::Opt;
use rquickjs::{Ctx, Exception, Function, Value};
use thiserror::Error;

use crate::runtime::ScriptRuntime;

pub const PRINT_NAME: &str = "print";
pub const SWITCH_LIGHT_NAME: &str = "switch_light";

/// Marshalling bound for `print` arguments; longer strings truncate
/// silently.
pub const PRINT_TRUNCATION_BYTES: usize = 255;

/// Marshalling bound for `switch_light` arguments. A truncated argument is
/// compared post-truncation, so over-long strings can never match the
/// on-token.
pub const SWITCH_ARG_TRUNCATION_BYTES: usize = 15;

/// Exact token that switches the light on.
pub const LIGHT_ON_TOKEN: &str = "On";

/// Level driven for the exact on-token. Boards with an active-low LED will
/// see the light invert; the mapping is a contract, not a convenience.
pub const LEVEL_ON: PinLevel = PinLevel::High;
/// Level driven for every other argument.
pub const LEVEL_OFF: PinLevel = PinLevel::Low;

pub type SharedSink = Arc<Mutex<dyn TextSink + Send>>;
pub type SharedPin = Arc<Mutex<dyn DigitalPin + Send>>;

/// Native endpoints the capability table closes over.
///
/// Shared handles rather than owned drivers so the supervisor (and tests)
/// can keep observing the endpoints after the runtime is gone.
pub struct CapabilityHost {
    pub console: SharedSink,
    pub light: SharedPin,
}

/// Errors raised while installing the capability table at boot. Fatal to
/// startup.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("capability '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("scripting engine rejected capability registration: {0}")]
    Engine(#[from] rquickjs::Error),
}

/// Build the capability table and install it into the global namespace.
///
/// Called exactly once per runtime, before any program executes. A name
/// collision with an existing global is a registration failure, not an
/// overwrite.
pub fn register(
    runtime: &ScriptRuntime,
    host: &CapabilityHost,
) -> Result<(), RegistrationError> {
    runtime
        .context
        .with(|ctx| -> Result<(), RegistrationError> {
            let table = [
                (PRINT_NAME, print_handler(&ctx, host)?),
                (SWITCH_LIGHT_NAME, switch_light_handler(&ctx, host)?),
            ];

            let globals = ctx.globals();
            for (name, handler) in table {
                let existing: Value = globals.get(name)?;
                if !existing.is_undefined() {
                    return Err(RegistrationError::DuplicateName {
                        name: name.to_string(),
                    });
                }
                globals.set(name, handler)?;
                tracing::debug!(capability = name, "registered native capability");
            }
            Ok(())
        })
}

/// `print(value) -> undefined`
///
/// Coerces the argument to its string form, truncates to
/// [`PRINT_TRUNCATION_BYTES`], and writes one line to the console sink.
/// Zero arguments is a no-op.
fn print_handler<'js>(
    ctx: &Ctx<'js>,
    host: &CapabilityHost,
) -> Result<Function<'js>, rquickjs::Error> {
    let console = Arc::clone(&host.console);
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, value: Opt<Value<'js>>| {
            let Some(value) = value.0 else {
                return;
            };
            let text = coerce_to_string(&ctx, value);
            let line = truncate_utf8(&text, PRINT_TRUNCATION_BYTES);
            console
                .lock()
                .expect("console sink lock poisoned")
                .write_line(line);
        },
    )
}

/// `switch_light(value) -> undefined`
///
/// Coerces the argument to its string form, truncates to
/// [`SWITCH_ARG_TRUNCATION_BYTES`], configures the pin as an output and
/// drives [`LEVEL_ON`] on an exact [`LIGHT_ON_TOKEN`] match, [`LEVEL_OFF`]
/// otherwise. Zero arguments fails the call with a `TypeError`.
fn switch_light_handler<'js>(
    ctx: &Ctx<'js>,
    host: &CapabilityHost,
) -> Result<Function<'js>, rquickjs::Error> {
    let light = Arc::clone(&host.light);
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, value: Opt<Value<'js>>| -> Result<(), rquickjs::Error> {
            let Some(value) = value.0 else {
                return Err(Exception::throw_type(
                    &ctx,
                    "switch_light expects one argument",
                ));
            };
            let text = coerce_to_string(&ctx, value);
            let token = truncate_utf8(&text, SWITCH_ARG_TRUNCATION_BYTES);
            let level = if token == LIGHT_ON_TOKEN {
                LEVEL_ON
            } else {
                LEVEL_OFF
            };
            tracing::debug!(token, ?level, "switching the light");

            let mut pin = light.lock().expect("pin driver lock poisoned");
            pin.configure_output();
            pin.set_level(level);
            Ok(())
        },
    )
}

/// Engine-provided string coercion that cannot fail the native call: a
/// value whose `toString` throws becomes a placeholder instead.
fn coerce_to_string<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    use rquickjs::prelude::Coerced;
    use rquickjs::FromJs;

    match Coerced::<String>::from_js(ctx, value) {
        Ok(Coerced(text)) => text,
        Err(_) => {
            let _ = ctx.catch();
            String::from("<unrepresentable>")
        }
    }
}

/// Longest prefix of `text` that fits `max_bytes` without splitting a
/// character.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{EngineLimits, ExecutionOutcome};
    use firefly_hal::console::MemorySink;
    use firefly_hal::gpio::{MemoryPin, PinId, PinMode};

    struct Fixture {
        runtime: ScriptRuntime,
        console: Arc<Mutex<MemorySink>>,
        pin: Arc<Mutex<MemoryPin>>,
    }

    fn fixture() -> Fixture {
        let runtime = ScriptRuntime::new(&EngineLimits::default()).unwrap();
        let console = Arc::new(Mutex::new(MemorySink::new()));
        let pin = Arc::new(Mutex::new(MemoryPin::new(PinId(2))));
        let host = CapabilityHost {
            console: console.clone(),
            light: pin.clone(),
        };
        register(&runtime, &host).unwrap();
        Fixture {
            runtime,
            console,
            pin,
        }
    }

    fn lines(fx: &Fixture) -> Vec<String> {
        fx.console.lock().unwrap().lines().to_vec()
    }

    #[test]
    fn print_writes_to_the_console_sink() {
        let fx = fixture();
        let outcome = fx.runtime.execute(b"print('hello, serial')").unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed);
        assert_eq!(lines(&fx), vec!["hello, serial".to_string()]);
    }

    #[test]
    fn print_uses_engine_string_coercion() {
        let fx = fixture();
        fx.runtime.execute(b"print(21 * 2)").unwrap();
        fx.runtime.execute(b"print(undefined)").unwrap();
        fx.runtime.execute(b"print({})").unwrap();
        assert_eq!(
            lines(&fx),
            vec![
                "42".to_string(),
                "undefined".to_string(),
                "[object Object]".to_string(),
            ]
        );
    }

    #[test]
    fn print_without_arguments_is_a_no_op() {
        let fx = fixture();
        let outcome = fx.runtime.execute(b"print()").unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed);
        assert!(lines(&fx).is_empty());
    }

    #[test]
    fn print_truncates_at_255_bytes() {
        let fx = fixture();
        let outcome = fx.runtime.execute(b"print('a'.repeat(300))").unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed);
        let lines = lines(&fx);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), PRINT_TRUNCATION_BYTES);
        assert!(lines[0].bytes().all(|b| b == b'a'));
    }

    #[test]
    fn print_truncation_respects_character_boundaries() {
        let fx = fixture();
        // U+00E9 encodes as two bytes; 255 falls mid-character.
        fx.runtime.execute(b"print('\\u00e9'.repeat(200))").unwrap();
        let lines = lines(&fx);
        assert_eq!(lines[0].len(), 254);
        assert_eq!(lines[0].chars().count(), 127);
        assert!(lines[0].chars().all(|c| c == '\u{00e9}'));
    }

    #[test]
    fn capabilities_return_undefined() {
        let fx = fixture();
        let outcome = fx
            .runtime
            .execute(
                b"if (print('x') !== undefined) throw new Error('print');\
                  if (switch_light('Off') !== undefined) throw new Error('switch');",
            )
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed);
    }

    #[test]
    fn on_token_drives_the_on_level() {
        let fx = fixture();
        fx.runtime.execute(b"switch_light('On')").unwrap();
        let pin = fx.pin.lock().unwrap();
        assert_eq!(pin.mode(), PinMode::Output);
        assert_eq!(pin.level(), Some(LEVEL_ON));
    }

    #[test]
    fn other_tokens_drive_the_off_level() {
        let fx = fixture();
        for chunk in [
            &b"switch_light('Off')"[..],
            &b"switch_light('')"[..],
            &b"switch_light('on')"[..],
        ] {
            assert_eq!(
                fx.runtime.execute(chunk).unwrap(),
                ExecutionOutcome::Completed
            );
            assert_eq!(fx.pin.lock().unwrap().level(), Some(LEVEL_OFF));
        }
    }

    #[test]
    fn overlong_arguments_truncate_and_miss_the_token() {
        let fx = fixture();
        // 'On' followed by padding: longer than the 15-byte bound, and the
        // truncated form still fails the exact match.
        fx.runtime
            .execute(b"switch_light('On' + ' '.repeat(20))")
            .unwrap();
        assert_eq!(fx.pin.lock().unwrap().level(), Some(LEVEL_OFF));
    }

    #[test]
    fn zero_argument_switch_light_fails_the_call() {
        let fx = fixture();
        match fx.runtime.execute(b"switch_light()").unwrap() {
            ExecutionOutcome::RuntimeError { diagnostic } => {
                assert!(diagnostic.contains("one argument"), "got: {diagnostic}");
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
        // No pin activity happened.
        assert_eq!(fx.pin.lock().unwrap().level(), None);
    }

    #[test]
    fn side_effects_before_a_throw_persist() {
        let fx = fixture();
        match fx
            .runtime
            .execute(b"switch_light('On'); throw new Error('later')")
            .unwrap()
        {
            ExecutionOutcome::RuntimeError { .. } => {}
            other => panic!("expected runtime error, got {other:?}"),
        }
        assert_eq!(fx.pin.lock().unwrap().level(), Some(LEVEL_ON));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let fx = fixture();
        let host = CapabilityHost {
            console: fx.console.clone(),
            light: fx.pin.clone(),
        };
        match register(&fx.runtime, &host) {
            Err(RegistrationError::DuplicateName { name }) => {
                assert_eq!(name, PRINT_NAME);
            }
            other => panic!("expected duplicate-name error, got {other:?}"),
        }
    }

    #[test]
    fn truncate_utf8_contract() {
        assert_eq!(truncate_utf8("abc", 5), "abc");
        assert_eq!(truncate_utf8("abcdef", 5), "abcde");
        // 2-byte character straddling the bound is dropped whole.
        assert_eq!(truncate_utf8("ab\u{00e9}", 3), "ab");
        assert_eq!(truncate_utf8("", 0), "");
    }
}
