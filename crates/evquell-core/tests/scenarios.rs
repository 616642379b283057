// Evquell Integration Tests
//
// Drives the configuration layer and the debounce state machine together
// through the end-to-end suppression timelines, without touching hardware:
// config -> rule sets -> note_activity/decide.

use std::time::{Duration, Instant};

use evquell_core::config::ConfigFile;
use evquell_core::{decide, note_activity, FilterState, Verdict};

const EV_KEY: u16 = 1;
const EV_REL: u16 = 2;
const KEY_A: u16 = 30;
const KEY_LEFTSHIFT: u16 = 42;
const BTN_LEFT: u16 = 272;
const REL_X: u16 = 0;

fn default_config() -> evquell_core::Config {
    ConfigFile::from_toml(
        r#"
        idle_ms = 750

        [monitor]
        device = "AT Translated Set 2 keyboard"

        [filter]
        device = "Example Mouse"
        "#,
    )
    .unwrap()
    .resolve()
    .unwrap()
}

#[test]
fn typing_then_clicking_suppresses_then_releases() {
    // idle = 0.75s; key at t=0 arms, click at t=0.5 drops, click at t=0.9
    // disarms and forwards.
    let config = default_config();
    let mut state = FilterState::new();
    let t0 = Instant::now();

    assert!(note_activity(&mut state, t0, &config.activity, EV_KEY, KEY_A));

    let verdict = decide(
        &mut state,
        t0 + Duration::from_millis(500),
        config.idle,
        &config.suppress,
        EV_KEY,
        BTN_LEFT,
    );
    assert_eq!(verdict, Verdict::Drop);

    let verdict = decide(
        &mut state,
        t0 + Duration::from_millis(900),
        config.idle,
        &config.suppress,
        EV_KEY,
        BTN_LEFT,
    );
    assert_eq!(verdict, Verdict::Forward);
    assert!(!state.is_filtering());
}

#[test]
fn modifier_key_does_not_arm_suppression() {
    // Default policy excludes modifiers, so shift+click passes through.
    let config = default_config();
    let mut state = FilterState::new();
    let t0 = Instant::now();

    assert!(!note_activity(
        &mut state,
        t0,
        &config.activity,
        EV_KEY,
        KEY_LEFTSHIFT
    ));

    let verdict = decide(
        &mut state,
        t0 + Duration::from_millis(5),
        config.idle,
        &config.suppress,
        EV_KEY,
        BTN_LEFT,
    );
    assert_eq!(verdict, Verdict::Forward);
}

#[test]
fn motion_passes_while_clicks_drop() {
    // Default suppression is key-typed only; pointer motion survives the
    // suppression window untouched.
    let config = default_config();
    let mut state = FilterState::new();
    let t0 = Instant::now();

    note_activity(&mut state, t0, &config.activity, EV_KEY, KEY_A);

    let at = t0 + Duration::from_millis(100);
    assert_eq!(
        decide(&mut state, at, config.idle, &config.suppress, EV_REL, REL_X),
        Verdict::Forward
    );
    assert_eq!(
        decide(
            &mut state,
            at,
            config.idle,
            &config.suppress,
            EV_KEY,
            BTN_LEFT
        ),
        Verdict::Drop
    );
}

#[test]
fn sync_records_always_pass() {
    let config = default_config();
    let mut state = FilterState::new();
    let t0 = Instant::now();

    note_activity(&mut state, t0, &config.activity, EV_KEY, KEY_A);

    // Synchronization framing is never suppressible, active window or not.
    let verdict = decide(
        &mut state,
        t0 + Duration::from_millis(1),
        config.idle,
        &config.suppress,
        0,
        0,
    );
    assert_eq!(verdict, Verdict::Forward);
}

#[test]
fn narrowed_suppress_set_spares_other_buttons() {
    let config = ConfigFile::from_toml(
        r#"
        [monitor]
        device = "kbd"

        [filter]
        device = "mouse"

        [filter.suppress]
        key = [272]
        "#,
    )
    .unwrap()
    .resolve()
    .unwrap();

    let mut state = FilterState::new();
    let t0 = Instant::now();
    note_activity(&mut state, t0, &config.activity, EV_KEY, KEY_A);

    let at = t0 + Duration::from_millis(50);
    assert_eq!(
        decide(
            &mut state,
            at,
            config.idle,
            &config.suppress,
            EV_KEY,
            BTN_LEFT
        ),
        Verdict::Drop
    );
    // BTN_RIGHT is outside the narrowed set.
    assert_eq!(
        decide(
            &mut state,
            at,
            config.idle,
            &config.suppress,
            EV_KEY,
            273
        ),
        Verdict::Forward
    );
}

#[test]
fn sustained_typing_keeps_suppression_armed() {
    let config = default_config();
    let mut state = FilterState::new();
    let t0 = Instant::now();

    // A keystroke every 400ms for two seconds, then a click 600ms after the
    // last one: still inside the renewed window.
    let mut last = t0;
    for tick in 0..5 {
        last = t0 + Duration::from_millis(400 * tick);
        note_activity(&mut state, last, &config.activity, EV_KEY, KEY_A);
    }

    let verdict = decide(
        &mut state,
        last + Duration::from_millis(600),
        config.idle,
        &config.suppress,
        EV_KEY,
        BTN_LEFT,
    );
    assert_eq!(verdict, Verdict::Drop);

    let verdict = decide(
        &mut state,
        last + Duration::from_millis(800),
        config.idle,
        &config.suppress,
        EV_KEY,
        BTN_LEFT,
    );
    assert_eq!(verdict, Verdict::Forward);
}
