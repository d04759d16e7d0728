use std::time::Duration;

use quill_config::QuillConfig;
use quill_core::{Buffer, TextEdit, TextSize};
use quill_document::{scheduler_config, DocumentPipeline, EditOutcome, PipelineConfig, PipelineDeps};
use quill_scheduler::{CancellationToken, Interactive, Scheduler};

#[tokio::test]
async fn headless_pipeline_parses_on_the_background_pools() {
    let config = QuillConfig::load_from_str(
        "[reparse]\ndebounce_ms = 10\n\n[scheduler]\nparse_threads = 1\nbatch_threads = 1\n",
    )
    .unwrap();
    let scheduler = Scheduler::new(scheduler_config(&config));
    let pipeline = DocumentPipeline::new(PipelineDeps::headless(
        scheduler,
        PipelineConfig::from_config(&config),
    ));

    let mut buffer = Buffer::new("main {");
    Interactive::assume_inline(|cx| pipeline.open(cx, buffer.snapshot().clone()));
    let first = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.get_latest_tree(0, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(first.has_errors(), "unclosed brace");

    let edit = TextEdit::insert(TextSize::from(6), " }");
    let snapshot = buffer.apply(&edit).unwrap();
    let outcome =
        Interactive::assume_inline(|cx| pipeline.notify_edit(cx, Some(edit), snapshot));
    assert!(matches!(outcome, EditOutcome::Scheduled { .. }));

    let second = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.get_latest_tree(1, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(second.text(), "main { }");
    assert!(!second.has_errors());
    assert_eq!(pipeline.reparse_scheduler().run_count(), 2);
}
