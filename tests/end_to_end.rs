//! End-to-end pipeline scenarios
//!
//! Drives the real runtime with scripted capture frames and scripted
//! engines, asserting on what reaches the recording renderer and what the
//! learned dictionary retains afterwards.

use screenlate_cache::CacheManager;
use screenlate_capture::{CaptureBackend, Frame, PixelFormat, Rect, Region, RegionSet, ScriptedBackend};
use screenlate_optimize::meta;
use screenlate_overlay::{DirectInvoker, OverlayRenderer, RecordingRenderer};
use screenlate_pipeline::{
    build_default_chain, build_stages, ChainRouteConfig, PipelineConfig, PipelineRuntime,
    RuntimeDeps,
};
use screenlate_plugins::{
    OcrOptions, PluginDescriptor, PluginKind, PluginRegistry, StubOcr, TextBlock,
    TranslationEngine,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const REGION: (i32, i32, u32, u32) = (0, 0, 64, 64);

fn region() -> Region {
    Region::new("main", 0, Rect::new(REGION.0, REGION.1, REGION.2, REGION.3))
}

fn frame_of(value: u8) -> Frame {
    Frame::new(
        vec![value; 64 * 64 * 3],
        64,
        64,
        PixelFormat::Rgb8,
        region(),
    )
    .unwrap()
}

fn block(text: &str, y: i32) -> TextBlock {
    TextBlock::new(text, Rect::new(0, y, 60, 20), 0.9)
}

/// Glossary-backed engine whose invocations are observable from the test
struct CountingEngine {
    entries: HashMap<(String, String, String), (String, f32)>,
    calls: Arc<AtomicUsize>,
}

impl CountingEngine {
    fn boxed(
        entries: &[(&str, &str, &str, &str)],
        calls: Arc<AtomicUsize>,
    ) -> Box<dyn TranslationEngine> {
        let mut map = HashMap::new();
        for (src, tgt, text, translated) in entries {
            map.insert(
                (src.to_string(), tgt.to_string(), text.to_string()),
                (translated.to_string(), 0.95),
            );
        }
        Box::new(CountingEngine {
            entries: map,
            calls,
        })
    }
}

impl TranslationEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn initialize(&mut self) -> screenlate_plugins::Result<()> {
        Ok(())
    }

    fn supports_pair(&self, _source_lang: &str, _target_lang: &str) -> bool {
        true
    }

    fn translate(
        &mut self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> screenlate_plugins::Result<(String, f32)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entries
            .get(&(
                source_lang.to_string(),
                target_lang.to_string(),
                text.trim().to_string(),
            ))
            .cloned()
            .ok_or_else(|| {
                screenlate_plugins::PluginError::EngineFailure(format!("no entry for '{text}'"))
            })
    }
}

struct Rig {
    runtime: PipelineRuntime,
    renderer: Arc<RecordingRenderer>,
    cache: Arc<CacheManager>,
    dict_dir: PathBuf,
}

fn build_rig(
    tag: &str,
    config: PipelineConfig,
    frames: Vec<Frame>,
    ocr_script: Vec<Vec<TextBlock>>,
    engine_entries: &'static [(&'static str, &'static str, &'static str, &'static str)],
    engine_calls: Arc<AtomicUsize>,
    dict_dir: Option<PathBuf>,
) -> Rig {
    let dict_dir = dict_dir.unwrap_or_else(|| {
        std::env::temp_dir().join(format!("screenlate-e2e-{}-{}", tag, std::process::id()))
    });

    let mut backend = ScriptedBackend::new();
    for frame in frames {
        backend.push(frame);
    }

    let registry = PluginRegistry::new();
    registry.register_ocr(
        PluginDescriptor::new(PluginKind::Ocr, "stub").essential(),
        move || {
            let mut ocr = StubOcr::new();
            for blocks in ocr_script.clone() {
                ocr.push_result(blocks);
            }
            Box::new(ocr)
        },
    );
    registry.register_translation(
        PluginDescriptor::new(PluginKind::Translation, "counting").essential(),
        move || CountingEngine::boxed(engine_entries, Arc::clone(&engine_calls)),
    );
    let registry = Arc::new(registry);

    let cache = Arc::new(CacheManager::with_dictionary_dir(&dict_dir));
    let stages = build_stages(
        &config,
        Box::new(backend) as Box<dyn CaptureBackend>,
        Arc::clone(&registry),
        None,
    )
    .unwrap();
    let chain = build_default_chain(&config);

    let renderer = Arc::new(RecordingRenderer::new());
    let mut regions = RegionSet::new("e2e");
    regions.upsert(region());

    let runtime = PipelineRuntime::new(
        config,
        RuntimeDeps {
            stages,
            chain,
            cache: Arc::clone(&cache),
            registry,
            renderer: Arc::clone(&renderer) as Arc<dyn OverlayRenderer>,
            invoker: Arc::new(DirectInvoker),
            regions,
        },
    )
    .unwrap();

    Rig {
        runtime,
        renderer,
        cache,
        dict_dir,
    }
}

fn base_config(source: &str, target: &str) -> PipelineConfig {
    PipelineConfig {
        source_lang: source.to_string(),
        target_lang: target.to_string(),
        motion_tracking: false,
        ocr_options: OcrOptions {
            language: source.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn identical_frames_skip_ocr_entirely() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut rig = build_rig(
        "frameskip",
        base_config("en", "de"),
        vec![frame_of(42), frame_of(42)],
        vec![vec![block("Hello world, this is text.", 0)]],
        &[("en", "de", "Hello world, this is text.", "Hallo Welt.")],
        calls,
        None,
    );
    std::fs::remove_dir_all(&rig.dict_dir).ok();

    rig.runtime.tick().unwrap();
    rig.runtime.tick().unwrap();

    let metrics = rig.runtime.metrics();
    assert_eq!(metrics.ocr_runs.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.frames_skipped.load(Ordering::Relaxed), 1);

    std::fs::remove_dir_all(&rig.dict_dir).ok();
}

#[test]
fn translation_chain_learns_both_pairs_and_goes_engine_free() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = PipelineConfig {
        chain_routes: vec![ChainRouteConfig {
            source: "ja".into(),
            target: "de".into(),
            via: vec!["en".into()],
        }],
        ..base_config("ja", "de")
    };
    let mut rig = build_rig(
        "chain",
        config,
        // Two visually different frames carrying the same text
        vec![frame_of(10), frame_of(200)],
        vec![
            vec![block("こんにちは", 0)],
            vec![block("こんにちは", 0)],
        ],
        &[
            ("ja", "en", "こんにちは", "hello"),
            ("en", "de", "hello", "hallo"),
        ],
        Arc::clone(&calls),
        None,
    );
    std::fs::remove_dir_all(&rig.dict_dir).ok();

    rig.runtime.tick().unwrap();

    // Both the intermediate and the direct pair were persisted
    let dictionary = rig.cache.dictionary();
    assert_eq!(
        dictionary.lookup("ja", "en", "こんにちは").unwrap().translation,
        "hello"
    );
    assert_eq!(
        dictionary.lookup("ja", "de", "こんにちは").unwrap().translation,
        "hallo"
    );
    let calls_after_first = calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_first, 2); // one per hop

    rig.runtime.tick().unwrap();

    // Second occurrence is a dictionary lookup, not an engine call
    assert_eq!(calls.load(Ordering::SeqCst), calls_after_first);
    let rendered = rig.renderer.current();
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].translated_text, "hallo");

    std::fs::remove_dir_all(&rig.dict_dir).ok();
}

#[test]
fn ocr_misreads_are_repaired_before_translation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut rig = build_rig(
        "spell",
        base_config("en", "de"),
        vec![frame_of(10)],
        vec![vec![block("When | was at horne", 0)]],
        &[("en", "de", "When I was at home", "Als ich zu Hause war")],
        calls,
        None,
    );
    std::fs::remove_dir_all(&rig.dict_dir).ok();

    rig.runtime.tick().unwrap();

    let rendered = rig.renderer.current();
    assert_eq!(rendered.len(), 1);
    // The corrected text is what went to the engine
    assert_eq!(rendered[0].source_text, "When I was at home");
    assert_eq!(rendered[0].translated_text, "Als ich zu Hause war");

    std::fs::remove_dir_all(&rig.dict_dir).ok();
}

#[test]
fn garbage_ocr_output_is_filtered_and_fragments_merged() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut rig = build_rig(
        "mergefilter",
        base_config("en", "de"),
        vec![frame_of(10)],
        vec![vec![
            TextBlock::new("Hello,", Rect::new(10, 10, 60, 20), 0.9),
            TextBlock::new("world!", Rect::new(75, 10, 60, 20), 0.9),
            TextBlock::new("!!!###", Rect::new(10, 60, 60, 20), 0.9),
        ]],
        &[("en", "de", "Hello, world!", "Hallo, Welt!")],
        calls,
        None,
    );
    std::fs::remove_dir_all(&rig.dict_dir).ok();

    rig.runtime.tick().unwrap();

    let rendered = rig.renderer.current();
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].source_text, "Hello, world!");
    assert_eq!(rendered[0].translated_text, "Hallo, Welt!");
    // Merged rectangle spans both fragments
    assert_eq!(rendered[0].rect.width, 125);

    std::fs::remove_dir_all(&rig.dict_dir).ok();
}

#[test]
fn learned_translations_survive_a_restart() {
    let dict_dir =
        std::env::temp_dir().join(format!("screenlate-e2e-persist-{}", std::process::id()));
    std::fs::remove_dir_all(&dict_dir).ok();

    let calls = Arc::new(AtomicUsize::new(0));
    let entries: &'static [(&str, &str, &str, &str)] =
        &[("en", "de", "The settings window is open.", "Das Fenster ist offen.")];

    {
        let mut rig = build_rig(
            "persist1",
            base_config("en", "de"),
            vec![frame_of(10)],
            vec![vec![block("The settings window is open.", 0)]],
            entries,
            Arc::clone(&calls),
            Some(dict_dir.clone()),
        );
        rig.runtime.tick().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        rig.cache.flush().unwrap();
    }

    // Fresh process: same text resolves from the dictionary on disk
    let mut rig = build_rig(
        "persist2",
        base_config("en", "de"),
        vec![frame_of(10)],
        vec![vec![block("The settings window is open.", 0)]],
        entries,
        Arc::clone(&calls),
        Some(dict_dir.clone()),
    );
    rig.runtime.tick().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let rendered = rig.renderer.current();
    assert_eq!(rendered[0].translated_text, "Das Fenster ist offen.");
    // Dictionary-sourced translations carry the dictionary identity
    assert_eq!(rendered[0].engine, "dictionary");

    std::fs::remove_dir_all(&dict_dir).ok();
}

#[test]
fn pre_translated_blocks_keep_their_metadata_contract() {
    // The carrier contract: a block marked skip_translation carries its own
    // translation and the runtime must not consult the engine for it
    let mut block = block("Known text", 0);
    block.set_meta(meta::SKIP_TRANSLATION, serde_json::json!(true));
    block.set_meta(meta::TRANSLATED_TEXT, serde_json::json!("Bekannt"));
    assert!(screenlate_optimize::PipelineData::block_skips_translation(
        &block
    ));
}
