//! End-to-end session scenarios against a scripted device.

mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{InitHook, LogCollector, ScriptedDevice, wait_until};
use qcscope::diag::opcodes;
use qcscope::log_mask::LogSubscription;
use qcscope::session::{DiagSession, SessionError};
use qcscope::transport::TransportKind;

/// Unframed bytes of a log record frame.
fn log_frame(log_code: u16, body: &[u8]) -> Vec<u8> {
    let inner_length = 12 + body.len() as u16;
    let mut frame = vec![opcodes::DIAG_LOG_F, 0x00];
    frame.extend_from_slice(&inner_length.to_le_bytes()); // outer length
    frame.extend_from_slice(&inner_length.to_le_bytes());
    frame.extend_from_slice(&log_code.to_le_bytes());
    frame.extend_from_slice(&0u64.to_le_bytes());
    frame.extend_from_slice(body);
    frame
}

fn log_config_operation(request: &[u8]) -> Option<u32> {
    if request.first() != Some(&opcodes::DIAG_LOG_CONFIG_F) || request.len() < 8 {
        return None;
    }
    Some(u32::from_le_bytes(request[4..8].try_into().unwrap()))
}

#[test]
fn loopback_echo_roundtrip() {
    let device = ScriptedDevice::echoing();
    let session = DiagSession::new(device.transport(TransportKind::Tcp));

    let result = Arc::new(Mutex::new(None));
    let captured = result.clone();
    session.add_module(Box::new(InitHook(move |diag| {
        *captured.lock().unwrap() = Some(diag.send_recv(opcodes::DIAG_VERNO_F, b"", false));
        Ok(())
    })));
    session.run().unwrap();

    match result.lock().unwrap().take() {
        Some(Ok((opcode, payload))) => {
            assert_eq!(opcode, opcodes::DIAG_VERNO_F);
            assert_eq!(payload, b"");
        }
        other => panic!("unexpected send_recv outcome: {other:?}"),
    }
}

#[test]
fn concurrent_send_recv_is_serialized() {
    let device = ScriptedDevice::echoing();
    let session = DiagSession::new(device.transport(TransportKind::Tcp));

    // distinct request/response opcodes, none of them log or message ones
    let test_opcodes = [
        opcodes::DIAG_VERNO_F,
        opcodes::DIAG_STATUS_F,
        opcodes::DIAG_DIAG_VER_F,
        opcodes::DIAG_TS_F,
    ];

    let results = Arc::new(Mutex::new(Vec::new()));
    let captured = results.clone();
    session.add_module(Box::new(InitHook(move |diag| {
        let mut workers = Vec::new();
        for (index, &opcode) in test_opcodes.iter().enumerate() {
            let diag = diag.clone();
            let results = captured.clone();
            workers.push(thread::spawn(move || {
                let response = diag.send_recv(opcode, &[index as u8], false);
                results.lock().unwrap().push((opcode, index as u8, response));
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        Ok(())
    })));
    session.run().unwrap();

    // every caller got its own response back
    let results = results.lock().unwrap();
    assert_eq!(results.len(), test_opcodes.len());
    for (opcode, payload_byte, response) in results.iter() {
        match response {
            Ok((resp_opcode, resp_payload)) => {
                assert_eq!(resp_opcode, opcode);
                assert_eq!(resp_payload, &vec![*payload_byte]);
            }
            Err(e) => panic!("send_recv failed: {e}"),
        }
    }

    // outbound: 2 housekeeping requests plus one frame per caller, each
    // exactly once
    let sent = device.sent_frames();
    assert_eq!(sent.len(), 2 + test_opcodes.len());
    for (index, &opcode) in test_opcodes.iter().enumerate() {
        let matching: Vec<_> = sent
            .iter()
            .filter(|frame| frame[0] == opcode && frame[1..] == [index as u8])
            .collect();
        assert_eq!(matching.len(), 1, "request {opcode:#04x} not sent exactly once");
    }
}

#[test]
fn unanswered_request_is_retransmitted_then_fatal() {
    // answer housekeeping, stay silent on everything else
    let device = ScriptedDevice::with_responder(|request| {
        if request[0] == opcodes::DIAG_LOG_CONFIG_F
            || request[0] == opcodes::DIAG_EXT_MSG_CONFIG_F
        {
            vec![request.to_vec()]
        } else {
            Vec::new()
        }
    });
    let session = DiagSession::new(device.transport(TransportKind::Tcp))
        .with_response_timeout(Duration::from_millis(100));

    let result = Arc::new(Mutex::new(None));
    let captured = result.clone();
    session.add_module(Box::new(InitHook(move |diag| {
        *captured.lock().unwrap() = Some(diag.send_recv(opcodes::DIAG_TS_F, b"", false));
        Ok(())
    })));
    session.run().unwrap();

    assert!(matches!(
        result.lock().unwrap().take(),
        Some(Err(SessionError::Timeout(opcode))) if opcode == opcodes::DIAG_TS_F
    ));

    // the original send plus DIAG_MAX_RETRANSMITS copies
    let attempts = device
        .sent_frames()
        .iter()
        .filter(|frame| frame[0] == opcodes::DIAG_TS_F)
        .count();
    assert_eq!(attempts, 4);
}

#[test]
fn mismatched_response_opcode_reads_as_concurrent_client() {
    let device = ScriptedDevice::with_responder(|request| {
        match log_config_operation(request) {
            // housekeeping disable: behave
            Some(0) => vec![request.to_vec()],
            // mask-size query: answer with an unrelated response opcode, as
            // a concurrently connected client would cause
            Some(_) => vec![vec![opcodes::DIAG_EXT_BUILD_ID_F, 0x00]],
            None => vec![request.to_vec()],
        }
    });
    let session = DiagSession::new(device.transport(TransportKind::Tcp));

    let result = Arc::new(Mutex::new(None));
    let captured = result.clone();
    session.add_module(Box::new(InitHook(move |diag| {
        *captured.lock().unwrap() = Some(LogSubscription::enable(diag, None));
        Ok(())
    })));
    session.run().unwrap();

    match result.lock().unwrap().take() {
        Some(Err(qcscope::log_mask::SubscriptionError::Session(
            SessionError::UnexpectedResponse {
                req_opcode,
                resp_opcode,
            },
        ))) => {
            assert_eq!(req_opcode, opcodes::DIAG_LOG_CONFIG_F);
            assert_eq!(resp_opcode, opcodes::DIAG_EXT_BUILD_ID_F);
        }
        other => panic!("expected a concurrent-client failure, got {other:?}"),
    }
}

#[test]
fn log_record_reply_is_not_a_response() {
    // a device answering a request with a log record: the record goes to
    // the log path, the matcher starves and gives up
    let device = ScriptedDevice::with_responder(|request| match log_config_operation(request) {
        Some(0) => vec![request.to_vec()],
        Some(_) => vec![log_frame(0x412f, &[1, 2, 3])],
        None => vec![request.to_vec()],
    });
    let session = DiagSession::new(device.transport(TransportKind::Tcp))
        .with_response_timeout(Duration::from_millis(100));

    let result = Arc::new(Mutex::new(None));
    let captured = result.clone();
    session.add_module(Box::new(InitHook(move |diag| {
        *captured.lock().unwrap() = Some(LogSubscription::enable(diag, None));
        Ok(())
    })));
    session.run().unwrap();

    assert!(matches!(
        result.lock().unwrap().take(),
        Some(Err(qcscope::log_mask::SubscriptionError::Session(
            SessionError::Timeout(opcode)
        ))) if opcode == opcodes::DIAG_LOG_CONFIG_F
    ));
}

/// Runs a session with a log collector, pushing `raw_chunks` into the read
/// side only after module init finished, and returns the collected records.
fn collect_logs_from_stream(raw_chunks: &[Vec<u8>]) -> Vec<qcscope::diag::LogRecord> {
    common::init_logging();
    let device = ScriptedDevice::echoing();
    let (collector, records) = LogCollector::new();

    let initialized = Arc::new(Mutex::new(false));
    let init_flag = initialized.clone();

    let session = DiagSession::new(device.transport(TransportKind::Tcp));
    session.add_module(Box::new(collector));
    // registered second: once this ran, the collector's init is over and
    // dispatch reaches it deterministically
    session.add_module(Box::new(InitHook(move |_diag| {
        *init_flag.lock().unwrap() = true;
        Ok(())
    })));

    let device_feeder = device.clone();
    let chunks = raw_chunks.to_vec();
    thread::spawn(move || {
        wait_until(Duration::from_secs(5), || *initialized.lock().unwrap());
        for chunk in chunks {
            device_feeder.push_raw(&chunk);
        }
        device_feeder.close();
    });

    session.run().unwrap();
    let records = records.lock().unwrap().clone();
    records
}

#[test]
fn partial_leading_frame_is_dropped_silently() {
    use qcscope::diag::CRC_CCITT;
    use qcscope::hdlc::hdlc_encapsulate;

    // an unterminated escape sequence plus a trailer: the tail of a frame
    // whose beginning predates the connection
    let fragment = vec![0x7d, 0x5e, 0x7e];
    let valid = hdlc_encapsulate(&log_frame(0xb0c0, &[0xaa; 4]), &CRC_CCITT);

    let records = collect_logs_from_stream(&[fragment, valid]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].log_code, 0xb0c0);
    assert_eq!(records[0].body, vec![0xaa; 4]);
}

#[test]
fn garbage_prefix_is_skipped_until_first_valid_frame() {
    use qcscope::diag::CRC_CCITT;
    use qcscope::hdlc::hdlc_encapsulate;

    // deterministic pseudo-garbage, trailer-terminated
    let mut garbage: Vec<u8> = (0..137u32).map(|i| (i * 37 + 11) as u8).collect();
    garbage.retain(|&b| b != 0x7e);
    garbage.push(0x7e);
    let valid = hdlc_encapsulate(&log_frame(0x512f, &[0x55; 8]), &CRC_CCITT);

    let records = collect_logs_from_stream(&[garbage, valid]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].log_code, 0x512f);
}

#[test]
fn multi_radio_wrapper_classifies_as_log() {
    use qcscope::diag::CRC_CCITT;
    use qcscope::hdlc::hdlc_encapsulate;

    let mut wrapped = vec![opcodes::DIAG_MULTI_RADIO_CMD_F];
    wrapped.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    wrapped.extend_from_slice(&log_frame(0xb821, &[0x42; 6]));

    let records = collect_logs_from_stream(&[hdlc_encapsulate(&wrapped, &CRC_CCITT)]);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].log_code, 0xb821);
    assert_eq!(records[0].body, vec![0x42; 6]);
}

#[test]
fn log_mask_negotiation_roundtrip() {
    // device advertises sizes {4: 8, 11: 16}; expects one SET_MASK each,
    // and zero masks of the same sizes on teardown
    let device = ScriptedDevice::with_responder(|request| {
        match log_config_operation(request) {
            Some(0) => vec![request.to_vec()],
            Some(1) => {
                // operation echo + status + 16 mask sizes
                let mut response = vec![opcodes::DIAG_LOG_CONFIG_F, 0, 0, 0];
                response.extend_from_slice(&1u32.to_le_bytes());
                response.extend_from_slice(&0u32.to_le_bytes());
                let mut sizes = [0u32; 16];
                sizes[4] = 8;
                sizes[11] = 16;
                for size in sizes {
                    response.extend_from_slice(&size.to_le_bytes());
                }
                vec![response]
            }
            Some(3) => {
                let mut response = vec![opcodes::DIAG_LOG_CONFIG_F, 0, 0, 0];
                response.extend_from_slice(&3u32.to_le_bytes());
                response.extend_from_slice(&0u32.to_le_bytes());
                vec![response]
            }
            _ => vec![request.to_vec()],
        }
    });
    let session = DiagSession::new(device.transport(TransportKind::Tcp));

    session.add_module(Box::new(InitHook(move |diag| {
        let subscription = LogSubscription::enable(diag, None)
            .map_err(|e| SessionError::Module(e.to_string()))?;
        assert_eq!(subscription.enabled(), &[(4, 8), (11, 16)]);
        subscription
            .disable(diag)
            .map_err(|e| SessionError::Module(e.to_string()))?;
        Ok(())
    })));
    session.run().unwrap();

    let set_masks: Vec<Vec<u8>> = device
        .sent_frames()
        .into_iter()
        .filter(|frame| log_config_operation(frame) == Some(3))
        .collect();
    assert_eq!(set_masks.len(), 4);

    let expect_set_mask = |frame: &[u8], equip: u32, bits: u32, mask: &[u8]| {
        let mut expected = vec![opcodes::DIAG_LOG_CONFIG_F, 0, 0, 0];
        expected.extend_from_slice(&3u32.to_le_bytes());
        expected.extend_from_slice(&equip.to_le_bytes());
        expected.extend_from_slice(&bits.to_le_bytes());
        expected.extend_from_slice(mask);
        assert_eq!(frame, expected);
    };
    expect_set_mask(&set_masks[0], 4, 8, &[0xff]);
    expect_set_mask(&set_masks[1], 11, 16, &[0xff, 0xff]);
    // teardown re-sends the same sub-commands with zeroed masks
    expect_set_mask(&set_masks[2], 4, 8, &[0x00]);
    expect_set_mask(&set_masks[3], 11, 16, &[0x00, 0x00]);
}

#[test]
fn one_shot_module_is_deregistered_and_session_ends() {
    let device = ScriptedDevice::echoing();
    let session = DiagSession::new(device.transport(TransportKind::Tcp));
    let ran = Arc::new(Mutex::new(false));
    let flag = ran.clone();
    session.add_module(Box::new(InitHook(move |_diag| {
        *flag.lock().unwrap() = true;
        Ok(())
    })));
    // run() returns because removing the only (one-shot) module shuts the
    // session down, not because the transport closed
    session.run().unwrap();
    assert!(*ran.lock().unwrap());
}
