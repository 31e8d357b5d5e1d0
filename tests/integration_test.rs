/// End-to-end tests through the C boundary with the mock engine.
///
/// Tests the complete flow:
///   load → embed (full, truncated, failing) → last error → free
use gguf_embed::engine::mock::{DecodeGate, MockEngine, MockFaults};
use gguf_embed::last_error::{last_error_kind, last_error_message};
use gguf_embed::{Bridge, EmbedClient, Embedder, ErrorKind};
use std::ffi::{CString, c_void};
use std::io::Write;
use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;

const DIMS: usize = 768;

fn model_file() -> (tempfile::NamedTempFile, CString) {
    let mut file = tempfile::NamedTempFile::with_suffix(".gguf").unwrap();
    file.write_all(b"GGUF\x03\x00\x00\x00").unwrap();
    let path = CString::new(file.path().to_str().unwrap()).unwrap();
    (file, path)
}

fn embed_raw(bridge: &Bridge<MockEngine>, handle: *mut c_void, text: &str, out: &mut [f32]) -> i32 {
    let text = CString::new(text).unwrap();
    unsafe { bridge.embed_raw(handle, text.as_ptr(), out.as_mut_ptr(), out.len() as i32) }
}

/// Scenario: load, embed "hello world" into a 4096 buffer, free.
#[test]
fn test_full_scenario() {
    let bridge = Bridge::new(MockEngine::new(DIMS));
    let (_file, path) = model_file();

    let handle = unsafe { bridge.load_raw(path.as_ptr(), 2048, 0) };
    assert!(!handle.is_null(), "load failed: {}", last_error_message());

    let mut buf = vec![f32::NAN; 4096];
    let n = embed_raw(&bridge, handle, "hello world", &mut buf);
    assert_eq!(n, DIMS as i32);
    assert!(buf[..DIMS].iter().all(|v| v.is_finite()), "first d values written");
    assert!(buf[DIMS..].iter().all(|v| v.is_nan()), "rest of buffer untouched");

    bridge.free_raw(handle);
    let stats = bridge.engine().stats();
    assert_eq!(stats.models_live.load(Ordering::SeqCst), 0);
    assert_eq!(stats.contexts_live.load(Ordering::SeqCst), 0);

    // An unrelated call afterwards still works.
    let (_file2, path2) = model_file();
    let handle2 = unsafe { bridge.load_raw(path2.as_ptr(), 0, 0) };
    assert!(!handle2.is_null());
    bridge.free_raw(handle2);
}

/// Truncation: a smaller buffer gets a prefix, the return value reports d.
#[test]
fn test_truncation_is_detectable() {
    let bridge = Bridge::new(MockEngine::new(DIMS));
    let (_file, path) = model_file();
    let handle = unsafe { bridge.load_raw(path.as_ptr(), 0, 0) };

    let mut full = vec![0.0f32; DIMS];
    assert_eq!(embed_raw(&bridge, handle, "truncate me", &mut full), DIMS as i32);

    let mut small = vec![0.0f32; 100];
    let n = embed_raw(&bridge, handle, "truncate me", &mut small);
    assert_eq!(n, DIMS as i32);
    assert!(n as usize > small.len(), "caller sees truncation");
    assert_eq!(small[..], full[..100]);

    bridge.free_raw(handle);
}

/// Same model, same text: same size and bit-identical values.
#[test]
fn test_repeated_embed_is_deterministic() {
    let bridge = Bridge::new(MockEngine::new(DIMS));
    let (_file, path) = model_file();
    let handle = unsafe { bridge.load_raw(path.as_ptr(), 0, 0) };

    let mut first = vec![0.0f32; DIMS];
    let mut second = vec![0.0f32; DIMS];
    let a = embed_raw(&bridge, handle, "stable input", &mut first);
    let b = embed_raw(&bridge, handle, "stable input", &mut second);
    assert_eq!(a, b);
    assert_eq!(
        first.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
        second.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
    );

    bridge.free_raw(handle);
}

/// Null, freed and never-issued handles all fail the same way.
#[test]
fn test_invalid_handles() {
    let bridge = Bridge::new(MockEngine::new(DIMS));
    let (_file, path) = model_file();
    let handle = unsafe { bridge.load_raw(path.as_ptr(), 0, 0) };
    bridge.free_raw(handle);

    let bogus = ptr::without_provenance_mut::<c_void>(0xdead);
    for h in [ptr::null_mut(), handle, bogus] {
        let mut out = vec![0.0f32; 8];
        assert_eq!(embed_raw(&bridge, h, "text", &mut out), -1);
        assert!(!last_error_message().is_empty());
        assert_eq!(last_error_kind(), ErrorKind::InvalidArgument);
    }
}

/// Load failures return null with a resource message.
#[test]
fn test_load_failure_message() {
    let bridge = Bridge::new(MockEngine::new(DIMS));
    let missing = CString::new("/nonexistent/dir/model.gguf").unwrap();
    let handle = unsafe { bridge.load_raw(missing.as_ptr(), 2048, 0) };
    assert!(handle.is_null());
    assert_eq!(last_error_kind(), ErrorKind::ResourceUnavailable);
    assert!(last_error_message().contains("failed to load model"));

    let empty = CString::new("").unwrap();
    assert!(unsafe { bridge.load_raw(empty.as_ptr(), 2048, 0) }.is_null());
    assert_eq!(last_error_kind(), ErrorKind::InvalidArgument);
}

/// Empty text on a BOS vocabulary gives a single-token embedding; without
/// BOS it is a controlled tokenization failure.
#[test]
fn test_empty_text() {
    let bridge = Bridge::new(MockEngine::new(16));
    let (_file, path) = model_file();
    let handle = unsafe { bridge.load_raw(path.as_ptr(), 0, 0) };
    let mut out = vec![0.0f32; 16];
    assert_eq!(embed_raw(&bridge, handle, "", &mut out), 16);
    bridge.free_raw(handle);

    let bridge = Bridge::new(MockEngine::new(16).without_bos());
    let handle = unsafe { bridge.load_raw(path.as_ptr(), 0, 0) };
    assert_eq!(embed_raw(&bridge, handle, "", &mut out), -1);
    assert_eq!(last_error_kind(), ErrorKind::TokenizationFailure);
    assert_eq!(bridge.engine().stats().contexts_live.load(Ordering::SeqCst), 0);
    bridge.free_raw(handle);
}

/// Each failure class leaves no context behind and sets its own kind.
#[test]
fn test_failure_kinds_release_resources() {
    let bridge = Bridge::new(MockEngine::new(16).with_faults(MockFaults {
        fail_sizing_on: Some("unsizable".to_string()),
        fail_decode_on: Some("undecodable".to_string()),
        null_embeddings_on: Some("hollow".to_string()),
        panic_decode_on: Some("crash".to_string()),
        ..Default::default()
    }));
    let (_file, path) = model_file();
    let handle = unsafe { bridge.load_raw(path.as_ptr(), 0, 0) };

    let cases = [
        ("unsizable text", ErrorKind::TokenizationFailure),
        ("undecodable text", ErrorKind::DecodeFailure),
        ("hollow text", ErrorKind::EmbeddingUnavailable),
        ("crash text", ErrorKind::InternalFault),
    ];
    for (text, kind) in cases {
        let mut out = vec![0.0f32; 16];
        assert_eq!(embed_raw(&bridge, handle, text, &mut out), -1, "{text}");
        assert_eq!(last_error_kind(), kind, "{text}: {}", last_error_message());
        assert_eq!(
            bridge.engine().stats().contexts_live.load(Ordering::SeqCst),
            0,
            "{text} leaked a context"
        );
    }

    bridge.free_raw(handle);
    assert_eq!(bridge.engine().stats().models_live.load(Ordering::SeqCst), 0);
}

/// Concurrent embeds on one handle: successes match a serial run and each
/// thread sees only its own error.
#[test]
fn test_concurrent_embeds_share_one_model() {
    let bridge = Arc::new(Bridge::new(MockEngine::new(64).with_faults(MockFaults {
        fail_decode_on: Some("poison".to_string()),
        ..Default::default()
    })));
    let (_file, path) = model_file();
    let handle = unsafe { bridge.load_raw(path.as_ptr(), 0, 0) };
    let handle_addr = handle.addr();

    let mut expected = vec![0.0f32; 64];
    assert_eq!(embed_raw(&bridge, handle, "good text", &mut expected), 64);

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let workers: Vec<_> = (0..threads)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let handle = ptr::without_provenance_mut::<c_void>(handle_addr);
                let failing = i % 2 == 1;
                let text = if failing { "poison text" } else { "good text" };
                barrier.wait();

                let mut out = vec![0.0f32; 64];
                let mut results = Vec::new();
                for _ in 0..20 {
                    let n = embed_raw(&bridge, handle, text, &mut out);
                    results.push((n, out.clone(), last_error_kind()));
                }
                (failing, results)
            })
        })
        .collect();

    for worker in workers {
        let (failing, results) = worker.join().unwrap();
        for (n, out, kind) in results {
            if failing {
                assert_eq!(n, -1);
                assert_eq!(kind, ErrorKind::DecodeFailure);
            } else {
                assert_eq!(n, 64);
                assert_eq!(out, expected);
                assert_eq!(kind, ErrorKind::None, "successful thread saw another thread's error");
            }
        }
    }

    bridge.free_raw(handle);
    let stats = bridge.engine().stats();
    assert_eq!(stats.contexts_live.load(Ordering::SeqCst), 0);
    assert_eq!(stats.models_live.load(Ordering::SeqCst), 0);
}

/// Freeing a model while an embed is inside decode defers the release until
/// that embed finishes; the embed itself still succeeds.
#[test]
fn test_free_during_embed_is_deferred() {
    let gate = DecodeGate::new();
    let bridge = Arc::new(Bridge::new(MockEngine::new(32).with_faults(MockFaults {
        decode_gate: Some(Arc::clone(&gate)),
        ..Default::default()
    })));
    let (_file, path) = model_file();
    let handle = unsafe { bridge.load_raw(path.as_ptr(), 0, 0) };
    assert!(!handle.is_null());
    let handle_addr = handle.addr();

    let worker = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            let handle = ptr::without_provenance_mut::<c_void>(handle_addr);
            let mut out = vec![0.0f32; 32];
            embed_raw(&bridge, handle, "in flight", &mut out)
        })
    };

    gate.wait_entered();
    bridge.free_raw(handle);
    let stats = bridge.engine().stats();
    assert_eq!(bridge.model_count(), 0, "handle is dead as soon as free returns");
    assert_eq!(
        stats.models_live.load(Ordering::SeqCst),
        1,
        "model must outlive the embed that is using it"
    );
    assert_eq!(stats.contexts_live.load(Ordering::SeqCst), 1);

    gate.release();
    assert_eq!(worker.join().unwrap(), 32, "in-flight embed completes normally");
    assert_eq!(stats.models_live.load(Ordering::SeqCst), 0);
    assert_eq!(stats.contexts_live.load(Ordering::SeqCst), 0);

    // New calls on the freed handle fail cleanly.
    let mut out = vec![0.0f32; 32];
    assert_eq!(embed_raw(&bridge, handle, "after free", &mut out), -1);
    assert_eq!(last_error_kind(), ErrorKind::InvalidArgument);
}

/// The Rust client path over the same bridge.
#[test]
fn test_embed_client() {
    let (file, _path) = model_file();
    let config = gguf_embed::config::ModelConfig {
        path: file.path().to_str().unwrap().to_string(),
        ..Default::default()
    };

    let client = EmbedClient::open(MockEngine::new(DIMS), &config).unwrap();
    assert_eq!(client.dimensions(), DIMS);

    let v1 = client.embed("hello world").unwrap();
    let v2 = client.embed("hello world").unwrap();
    let v3 = client.embed("different text").unwrap();
    assert_eq!(v1, v2, "Same input should produce same embedding");
    assert_ne!(v1, v3, "Different input should produce different embedding");
    assert_eq!(v1.len(), DIMS);
}
