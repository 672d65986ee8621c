// Controller state-machine scenarios against the mock vendor backend.

mod common;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{InMemoryWatcherFactory, MockDigitizer, MockScriptHost};
use wavescope::digitizer::collaborators::{ScriptHost, WatcherFactory};
use wavescope::digitizer::messages::{DigitizerCommand, DigitizerMessage, DigitizerState};
use wavescope::digitizer::Digitizer;
use wavescope::error::StatusCodes;
use wavescope::identification::{Identification, PersistentDirectories};
use wavescope::sync::Timeout;
use wavescope::vendor::types::{DeviceListEntry, PRODUCT_ID_GEN4_BASE, PRODUCT_ID_GEN4_WIDE};
use wavescope::vendor::DigitizerApi;

struct Setup {
    api: Arc<MockDigitizer>,
    factory: Arc<InMemoryWatcherFactory>,
    host: Arc<MockScriptHost>,
    digitizer: Digitizer,
}

fn build() -> Setup {
    let api = Arc::new(MockDigitizer::new(1));
    let factory = Arc::new(InMemoryWatcherFactory::default());
    let host = Arc::new(MockScriptHost::new());
    let digitizer = Digitizer::new(
        Arc::clone(&api) as Arc<dyn DigitizerApi>,
        0,
        1,
        PathBuf::from("/var/lib/wavescope"),
        Arc::clone(&factory) as Arc<dyn WatcherFactory>,
        Some(Arc::clone(&host) as Arc<dyn ScriptHost>),
    );
    Setup {
        api,
        factory,
        host,
        digitizer,
    }
}

/// Collect messages until the predicate matches one, panicking on timeout.
/// Returns everything collected, the matching message included.
fn collect_until<F>(digitizer: &Digitizer, predicate: F, timeout: Duration) -> Vec<DigitizerMessage>
where
    F: Fn(&DigitizerMessage) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut messages = Vec::new();
    while Instant::now() < deadline {
        if let Ok(message) = digitizer.wait_for_message(Timeout::Millis(100)) {
            let done = predicate(&message);
            messages.push(message);
            if done {
                return messages;
            }
        }
    }
    panic!("timed out; collected so far: {:?}", messages);
}

fn wait_until_idle(digitizer: &Digitizer) -> Vec<DigitizerMessage> {
    collect_until(
        digitizer,
        |message| matches!(message, DigitizerMessage::State(DigitizerState::Idle)),
        Duration::from_secs(5),
    )
}

fn position_of<F>(messages: &[DigitizerMessage], predicate: F) -> usize
where
    F: Fn(&DigitizerMessage) -> bool,
{
    messages
        .iter()
        .position(predicate)
        .unwrap_or_else(|| panic!("message not found in {:?}", messages))
}

#[test]
fn initialization_publishes_the_device_inventory() {
    let setup = build();
    setup.digitizer.start().unwrap();

    let messages = wait_until_idle(&setup.digitizer);

    assert!(messages
        .iter()
        .any(|m| matches!(m, DigitizerMessage::State(DigitizerState::Initialization))));
    assert!(messages
        .iter()
        .any(|m| matches!(m, DigitizerMessage::Initialized(_))));

    let boot = messages.iter().find_map(|m| match m {
        DigitizerMessage::BootStatus {
            state,
            description,
            entries,
        } => Some((*state, description.clone(), entries.clone())),
        _ => None,
    });
    let (state, description, entries) = boot.expect("boot status must be published");
    assert_eq!(state, 5);
    assert_eq!(description, "Operational");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].label, "DCDC");

    let tree = messages.iter().find_map(|m| match m {
        DigitizerMessage::SensorTree(tree) => Some(tree.clone()),
        _ => None,
    });
    let tree = tree.expect("sensor tree must be published");
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].label, "Ambient");
    assert_eq!(tree[0].sensors.len(), 2);

    // The watchers were keyed on serial number and firmware name, lowercased.
    let handles = setup.factory.handles.lock().unwrap();
    assert_eq!(handles.len(), 2);
    assert!(handles[0]
        .path
        .ends_with("parameters_top_spd-12345_1ch-fwdaq.json"));
    assert!(handles[1]
        .path
        .ends_with("parameters_clock_system_spd-12345_1ch-fwdaq.json"));

    setup.digitizer.stop().unwrap();
}

#[test]
fn start_acquisition_acknowledges_in_order() {
    // State(Acquisition), then the echo with result OK, then EventClear.
    let setup = build();
    setup.digitizer.start().unwrap();
    wait_until_idle(&setup.digitizer);

    setup
        .digitizer
        .push_command(DigitizerCommand::StartAcquisition)
        .unwrap();

    let messages = collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventClear),
        Duration::from_secs(5),
    );

    let state = position_of(&messages, |m| {
        matches!(m, DigitizerMessage::State(DigitizerState::Acquisition))
    });
    let echo = position_of(&messages, |m| {
        matches!(
            m,
            DigitizerMessage::CommandDone {
                command: DigitizerCommand::StartAcquisition,
                result: StatusCodes::OK,
            }
        )
    });
    let clear = position_of(&messages, |m| matches!(m, DigitizerMessage::EventClear));
    assert!(state < echo && echo < clear);
    assert!(setup.api.acquisition_running.load(Ordering::SeqCst));

    setup.digitizer.stop().unwrap();
    assert!(!setup.api.acquisition_running.load(Ordering::SeqCst));
}

#[test]
fn failing_command_echoes_error_and_keeps_state() {
    let setup = build();
    setup.digitizer.start().unwrap();
    wait_until_idle(&setup.digitizer);

    setup
        .api
        .fail_set_parameters_string
        .store(true, Ordering::SeqCst);
    setup
        .digitizer
        .push_command(DigitizerCommand::SetTopParameters)
        .unwrap();

    let messages = collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventError(_)),
        Duration::from_secs(5),
    );

    assert!(messages
        .iter()
        .any(|m| matches!(m, DigitizerMessage::EventConfiguration)));
    assert!(messages.iter().any(|m| matches!(
        m,
        DigitizerMessage::CommandDone {
            command: DigitizerCommand::SetTopParameters,
            result: StatusCodes::INTERNAL,
        }
    )));
    // No state transition happened.
    assert!(!messages
        .iter()
        .any(|m| matches!(m, DigitizerMessage::State(_))));

    // The controller remains usable: the next command still works.
    setup
        .api
        .fail_set_parameters_string
        .store(false, Ordering::SeqCst);
    setup
        .digitizer
        .push_command(DigitizerCommand::StartAcquisition)
        .unwrap();
    collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::State(DigitizerState::Acquisition)),
        Duration::from_secs(5),
    );

    setup.digitizer.stop().unwrap();
}

#[test]
fn sensor_snapshots_grow_monotonically() {
    let setup = build();
    setup.digitizer.start().unwrap();
    wait_until_idle(&setup.digitizer);

    let first = setup
        .digitizer
        .wait_for_sensor_records(Timeout::Millis(3000))
        .expect("a sensor snapshot within the polling period");
    assert_eq!(first.len(), 2);

    let second = setup
        .digitizer
        .wait_for_sensor_records(Timeout::Millis(3000))
        .expect("a second snapshot");

    for (before, after) in first.iter().zip(second.iter()) {
        assert_eq!(before.id, after.id);
        assert!(after.y.len() > before.y.len());
        assert!(after.x.windows(2).all(|pair| pair[1] > pair[0]));
    }

    setup.digitizer.stop().unwrap();
}

#[test]
fn get_then_initialize_requires_confirmation() {
    let setup = build();
    setup.digitizer.start().unwrap();
    wait_until_idle(&setup.digitizer);

    // Load the (nonempty) device parameters into the held blobs.
    setup
        .digitizer
        .push_command(DigitizerCommand::GetTopParameters)
        .unwrap();
    collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventClear),
        Duration::from_secs(5),
    );

    // Initializing now would overwrite them; the controller asks first.
    setup
        .digitizer
        .push_command(DigitizerCommand::InitializeParameters)
        .unwrap();
    let messages = collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventClear),
        Duration::from_secs(5),
    );
    assert!(messages
        .iter()
        .any(|m| matches!(m, DigitizerMessage::InitializeWouldOverwrite)));

    // The forced variant pushes fresh defaults to both watchers.
    setup
        .digitizer
        .push_command(DigitizerCommand::InitializeParametersForce)
        .unwrap();
    collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventClear),
        Duration::from_secs(5),
    );

    let handles = setup.factory.handles.lock().unwrap();
    assert!(!handles[0].commands.is_empty());
    assert!(!handles[1].commands.is_empty());

    setup.digitizer.stop().unwrap();
}

#[test]
fn watcher_update_hands_the_blob_to_the_controller() {
    use wavescope::digitizer::collaborators::WatcherEvent;

    let setup = build();
    setup.digitizer.start().unwrap();
    wait_until_idle(&setup.digitizer);

    let top_events = {
        let handles = setup.factory.handles.lock().unwrap();
        Arc::clone(&handles[0].events)
    };
    top_events
        .write(
            WatcherEvent::FileUpdated(Arc::new(r#"{"edited":true}"#.to_string())),
            Timeout::Immediate,
        )
        .unwrap();

    collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::ChangedTopParameters),
        Duration::from_secs(5),
    );

    // Applying the parameters transmits exactly the held blob.
    setup
        .digitizer
        .push_command(DigitizerCommand::SetTopParameters)
        .unwrap();
    collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventClear),
        Duration::from_secs(5),
    );
    assert!(setup
        .api
        .applied_parameters
        .lock()
        .unwrap()
        .iter()
        .any(|blob| blob == r#"{"edited":true}"#));

    setup.digitizer.stop().unwrap();
}

#[test]
fn call_python_refreshes_parameters_or_reraises() {
    let setup = build();
    setup.digitizer.start().unwrap();
    wait_until_idle(&setup.digitizer);

    setup
        .digitizer
        .push_command(DigitizerCommand::CallPython("setup".to_string()))
        .unwrap();
    let messages = collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventClear),
        Duration::from_secs(5),
    );
    assert!(messages
        .iter()
        .any(|m| matches!(m, DigitizerMessage::EventPython)));

    // The failing variant surfaces the captured output in the error event.
    setup.host.fail.store(true, Ordering::SeqCst);
    setup
        .digitizer
        .push_command(DigitizerCommand::CallPython("broken".to_string()))
        .unwrap();
    let messages = collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventError(_)),
        Duration::from_secs(5),
    );
    let error = messages
        .iter()
        .find_map(|m| match m {
            DigitizerMessage::EventError(text) => Some(text.clone()),
            _ => None,
        })
        .unwrap();
    assert!(error.contains("RuntimeError"), "got: {}", error);

    setup.digitizer.stop().unwrap();
}

#[test]
fn scale_record_length_rewrites_enabled_channels() {
    let setup = build();
    setup.digitizer.start().unwrap();
    wait_until_idle(&setup.digitizer);

    setup
        .digitizer
        .push_command(DigitizerCommand::ScaleRecordLength(2.0))
        .unwrap();
    collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventClear),
        Duration::from_secs(5),
    );
    assert_eq!(
        setup.api.acquisition.lock().unwrap().channel[0].record_length,
        16384
    );

    setup
        .digitizer
        .push_command(DigitizerCommand::ScaleRecordLength(0.5))
        .unwrap();
    collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventClear),
        Duration::from_secs(5),
    );
    assert_eq!(
        setup.api.acquisition.lock().unwrap().channel[0].record_length,
        8192
    );

    setup.digitizer.stop().unwrap();
}

#[test]
fn unsupported_command_in_idle_is_rejected() {
    let setup = build();
    setup.digitizer.start().unwrap();
    wait_until_idle(&setup.digitizer);

    setup
        .digitizer
        .push_command(DigitizerCommand::StopAcquisition)
        .unwrap();
    let messages = collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventError(_)),
        Duration::from_secs(5),
    );
    assert!(messages.iter().any(|m| matches!(
        m,
        DigitizerMessage::CommandDone {
            command: DigitizerCommand::StopAcquisition,
            result: StatusCodes::UNSUPPORTED,
        }
    )));

    setup.digitizer.stop().unwrap();
}

#[test]
fn acquisition_status_polling_reports_overflow_and_dram() {
    let setup = build();
    setup.digitizer.start().unwrap();
    wait_until_idle(&setup.digitizer);

    setup.api.overflow.store(true, Ordering::SeqCst);
    setup
        .digitizer
        .push_command(DigitizerCommand::StartAcquisition)
        .unwrap();

    // Within the one-second status cadence both the overflow event and the
    // DRAM fill (mocked at one quarter) must come through.
    let messages = collect_until(
        &setup.digitizer,
        |m| matches!(m, DigitizerMessage::EventOverflow),
        Duration::from_secs(5),
    );
    let fill = messages.iter().find_map(|m| match m {
        DigitizerMessage::DramFill(fill) => Some(*fill),
        _ => None,
    });
    match fill {
        Some(fill) => assert!((fill - 0.25).abs() < 1e-9),
        None => {
            // The overflow event may precede the first DRAM message within
            // one polling round; wait for the fill separately.
            let messages = collect_until(
                &setup.digitizer,
                |m| matches!(m, DigitizerMessage::DramFill(_)),
                Duration::from_secs(5),
            );
            let fill = messages
                .iter()
                .find_map(|m| match m {
                    DigitizerMessage::DramFill(fill) => Some(*fill),
                    _ => None,
                })
                .unwrap();
            assert!((fill - 0.25).abs() < 1e-9);
        }
    }

    setup.digitizer.stop().unwrap();
}

#[test]
fn identification_publishes_recognized_devices() {
    let mut api = MockDigitizer::new(1);
    api.devices = vec![
        DeviceListEntry {
            product_id: PRODUCT_ID_GEN4_BASE,
        },
        DeviceListEntry { product_id: 0x0014 },
        DeviceListEntry {
            product_id: PRODUCT_ID_GEN4_WIDE,
        },
    ];
    let api = Arc::new(api);

    let identification = Identification::new(
        Arc::clone(&api) as Arc<dyn DigitizerApi>,
        PersistentDirectories {
            configuration: PathBuf::from("/var/lib/wavescope"),
            log: PathBuf::from("/var/log/wavescope"),
        },
        Arc::new(InMemoryWatcherFactory::default()) as Arc<dyn WatcherFactory>,
        None,
    );

    identification.start().unwrap();
    let result = identification
        .wait_for_result(Timeout::Millis(5000))
        .unwrap();
    identification.stop().unwrap();

    assert!(result.compatible);
    assert_eq!(result.digitizers.len(), 2);
    // Control indexes are 1-based positions of the discovered devices.
    assert_eq!(result.digitizers[0].index(), 1);
    assert_eq!(result.digitizers[1].index(), 3);
}

#[test]
fn incompatible_api_still_publishes_a_result() {
    let mut api = MockDigitizer::new(1);
    api.compatible = false;
    let api = Arc::new(api);

    let identification = Identification::new(
        Arc::clone(&api) as Arc<dyn DigitizerApi>,
        PersistentDirectories::default(),
        Arc::new(InMemoryWatcherFactory::default()) as Arc<dyn WatcherFactory>,
        None,
    );

    identification.start().unwrap();
    let result = identification
        .wait_for_result(Timeout::Millis(5000))
        .unwrap();

    assert!(!result.compatible);
    assert!(result.digitizers.is_empty());
    // The worker's exit code reports the incompatibility.
    assert!(identification.stop().is_err());
}
