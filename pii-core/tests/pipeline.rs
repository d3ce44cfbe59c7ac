//! End-to-end: dataset and recorded predictions through merge, evaluation and reports.

use pii_core::consensus::{ConsensusMerger, MergeMode, WeightedSource};
use pii_core::metrics::{evaluate_corpus, ALL_MICRO};
use pii_core::recognizer::Recognizer;
use pii_core::report::{write_report_file, CombinedReport};
use pii_core::{Anonymizer, Dataset, EvalConfig, MatchPolicy, OverlapResolver, Predictions, Span};

const DATASET: &str = r#"{
    "dialogs": [
        { "id": 1, "text": "Меня зовут Иван, телефон 89991234567", "entities": [
            { "start": 11, "end": 15, "type": "PERSON", "text": "Иван" },
            { "start": 25, "end": 36, "type": "PHONE", "text": "89991234567" }
        ] },
        { "id": 2, "text": "Мне 25 лет", "entities": [
            { "start": 4, "end": 10, "type": "AGE", "text": "25 лет" }
        ] }
    ]
}"#;

const BERT: &str = r#"{ "source": "bert", "dialogs": [
    { "id": 1, "entities": [
        { "start": 11, "end": 15, "type": "PERSON", "text": "Иван" },
        { "start": 25, "end": 36, "type": "PHONE", "text": "89991234567" }
    ] },
    { "id": 2, "entities": [] }
] }"#;

const REGEXP: &str = r#"{ "source": "regexp", "dialogs": [
    { "id": 1, "entities": [
        { "start": 25, "end": 36, "type": "PHONE", "text": "89991234567" },
        { "start": 25, "end": 36, "type": "INN", "text": "89991234567" }
    ] },
    { "id": 2, "error": "timeout" }
] }"#;

fn merger() -> ConsensusMerger {
    ConsensusMerger::new(
        vec![WeightedSource::new("bert", 1.3), WeightedSource::new("regexp", 0.7)],
        MergeMode::Consensus { threshold: 0.4 },
        OverlapResolver::longest_first(),
    )
    .unwrap()
}

#[test]
fn merge_evaluate_and_report() {
    let dataset = Dataset::from_json(DATASET).unwrap();
    let bert = Predictions::from_json(BERT).unwrap().to_recognizer(&dataset);
    let regexp = Predictions::from_json(REGEXP).unwrap().to_recognizer(&dataset);
    let recognizers: Vec<&dyn Recognizer> = vec![&bert, &regexp];

    let merger = merger();
    let documents: Vec<(Vec<Span>, Vec<Span>)> = dataset
        .dialogs
        .iter()
        .map(|d| {
            let outcome = merger.merge_with(&recognizers, &d.text).unwrap();
            (d.entities.clone(), outcome.spans)
        })
        .collect();

    // INN got 0.7 / 2.0 = 0.35 of the vote and is gone; PHONE and PERSON survive
    assert_eq!(documents[0].1.len(), 2);
    assert!(documents[0].1.iter().all(|s| s.entity_type != "INN"));
    assert!(documents[1].1.is_empty());

    let report = evaluate_corpus(&documents, MatchPolicy::Strict);
    let micro = report.get(ALL_MICRO).unwrap();
    assert_eq!((micro.tp, micro.total_true, micro.total_pred), (2, 3, 2));
    assert_eq!(report.get("AGE").unwrap().recall, 0.0);

    let dir = tempfile::tempdir().unwrap();
    write_report_file(dir.path().join("test_hybrid_metrics.csv"), &report).unwrap();
    let combined_path = dir.path().join("test_combined_metrics.csv");
    let mut combined = CombinedReport::new();
    combined.add("hybrid", &report);
    combined.write(&combined_path).unwrap();
    assert!(CombinedReport::load(&combined_path).unwrap().contains_method("hybrid"));
}

#[test]
fn resolved_output_can_be_anonymized() {
    let dataset = Dataset::from_json(DATASET).unwrap();
    let regexp = Predictions::from_json(REGEXP).unwrap().to_recognizer(&dataset);
    let dialog = &dataset.dialogs[0];

    let config = EvalConfig::from_json(r#"{ "resolver": "priority" }"#).unwrap();
    let spans = config.resolver().resolve(regexp.extract(&dialog.text).unwrap());
    assert_eq!(spans.len(), 1);

    let text = Anonymizer::default().anonymize(&dialog.text, &spans).unwrap();
    assert_eq!(text, "Меня зовут Иван, телефон <PHONE>");
}
