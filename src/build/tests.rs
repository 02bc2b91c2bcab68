use super::*;
use crate::combine::{CombineError, CombineRequest, Combiner, Recipe};
use crate::config::PipelineConfig;
use crate::discovery::discover;
use crate::error::RefError;
use crate::layout::{PeriodClass, PeriodLabel};
use crate::observation::{CatalogMetadata, Category, FrameMetadata, ModeKey};
use crate::strategy::{Strategy, StrategySelector};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct Call {
    recipe: Option<Recipe>,
    frames: Vec<PathBuf>,
    baselines: Vec<PathBuf>,
}

/// Writes a small file for every request and records what it was asked
#[derive(Default)]
struct RecordingCombiner {
    calls: Vec<Call>,
    fail_on: Option<Recipe>,
    leave_no_output: bool,
    /// Publish this file from "another process" during the next combine
    racing_target: Option<PathBuf>,
}

impl Combiner for RecordingCombiner {
    fn combine(&mut self, request: &CombineRequest<'_>) -> Result<(), CombineError> {
        self.calls.push(Call {
            recipe: Some(request.recipe),
            frames: request.frames.to_vec(),
            baselines: request.baselines.to_vec(),
        });
        if self.fail_on == Some(request.recipe) {
            return Err(CombineError::Failed("synthetic failure".to_string()));
        }
        if let Some(target) = self.racing_target.take() {
            fs::write(target, b"other").unwrap();
        }
        if !self.leave_no_output {
            fs::write(request.output, request.recipe.as_str()).unwrap();
        }
        Ok(())
    }

    fn average(&mut self, parts: [&Path; 2], output: &Path) -> Result<(), CombineError> {
        self.calls.push(Call {
            recipe: None,
            frames: parts.iter().map(|p| p.to_path_buf()).collect(),
            baselines: Vec::new(),
        });
        fs::write(output, b"average").unwrap();
        Ok(())
    }
}

fn wk(index: u32) -> PeriodLabel {
    PeriodLabel::new(PeriodClass::Wk, index)
}

fn add_frames(
    catalog: &mut CatalogMetadata,
    dir: &Path,
    prefix: &str,
    count: usize,
    category: Category,
    mode: ModeKey,
    imsets: u32,
    t0: f64,
) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let name = format!("{}{:02}_raw.fits", prefix, i);
        fs::write(dir.join(&name), b"raw").unwrap();
        catalog.insert(
            name,
            FrameMetadata {
                timestamp: t0 + i as f64 * 0.1,
                category,
                gain: mode.gain,
                xbin: mode.xbin,
                ybin: mode.ybin,
                imsets,
            },
        );
    }
}

/// `12345_03` tree: a deep wk01 bias, a shallow wk02 bias, darks for both weeks
fn standard_tree(base: &Path) -> (PathBuf, CatalogMetadata) {
    let root = base.join("12345_03");
    let mut catalog = CatalogMetadata::new();
    let m = ModeKey::UNBINNED;
    add_frames(&mut catalog, &root.join("biases/1-1x1/wk01"), "oba", 10, Category::Bias, m, 10, 100.0);
    add_frames(&mut catalog, &root.join("biases/1-1x1/wk02"), "obb", 3, Category::Bias, m, 10, 107.0);
    add_frames(&mut catalog, &root.join("darks/wk01"), "oda", 2, Category::Dark, m, 1, 100.5);
    add_frames(&mut catalog, &root.join("darks/wk02"), "odb", 2, Category::Dark, m, 1, 107.5);
    (root, catalog)
}

fn plan(root: &Path, catalog: &CatalogMetadata, external: &ExternalBaselines) -> BuildGraph {
    let config = PipelineConfig::default();
    let selector = StrategySelector::new(&config);
    let discovery = discover(root).unwrap();
    BuildGraph::plan(root, &discovery, catalog, &selector, external).unwrap()
}

fn plan_err(root: &Path, catalog: &CatalogMetadata) -> RefError {
    let config = PipelineConfig::default();
    let selector = StrategySelector::new(&config);
    let discovery = discover(root).unwrap();
    BuildGraph::plan(root, &discovery, catalog, &selector, &ExternalBaselines::default())
        .unwrap_err()
}

#[test]
fn test_plan_declares_every_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());
    assert_eq!(graph.len(), 6);

    let base = graph.get(&NodeKey::BaseBias(ModeKey::UNBINNED)).unwrap();
    assert_eq!(base.frames.len(), 13);
    assert_eq!(base.imsets, 130);
    assert_eq!(base.output, root.join("biases/1-1x1/all/basebias.fits"));

    let deep = graph
        .get(&NodeKey::PeriodBias {
            mode: ModeKey::UNBINNED,
            label: wk(1),
        })
        .unwrap();
    assert_eq!(deep.strategy, Strategy::Direct);
    assert_eq!(deep.recipe, Recipe::RefBias);
    assert!(deep.baselines.is_empty());
    assert_eq!(
        deep.output,
        root.join("biases/1-1x1/wk01/refbias_12345_wk01.fits")
    );

    let shallow = graph
        .get(&NodeKey::PeriodBias {
            mode: ModeKey::UNBINNED,
            label: wk(2),
        })
        .unwrap();
    assert_eq!(shallow.strategy, Strategy::BaselineAssisted);
    assert_eq!(
        shallow.baselines,
        vec![Baseline::Node(NodeKey::BaseBias(ModeKey::UNBINNED))]
    );
    assert_eq!(
        shallow.output,
        root.join("biases/1-1x1/wk02/weekbias_12345_03_wk02.fits")
    );

    let basedark = graph.get(&NodeKey::BaseDark).unwrap();
    assert_eq!(basedark.frames.len(), 4);
    assert_eq!(
        basedark.baselines,
        vec![Baseline::Node(NodeKey::BaseBias(ModeKey::UNBINNED))]
    );
}

#[test]
fn test_dark_joins_bias_of_same_period() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());

    let dark = graph.get(&NodeKey::PeriodDark(wk(2))).unwrap();
    assert_eq!(dark.strategy, Strategy::BaselineAssisted);
    assert_eq!(
        dark.baselines,
        vec![
            Baseline::Node(NodeKey::BaseDark),
            Baseline::Node(NodeKey::PeriodBias {
                mode: ModeKey::UNBINNED,
                label: wk(2)
            }),
        ]
    );
    assert_eq!(
        dark.output,
        root.join("darks/wk02/weekdark_12345_03_wk02.fits")
    );
}

#[test]
fn test_dark_without_period_bias_falls_back_to_base_bias() {
    let dir = tempfile::tempdir().unwrap();
    let (root, mut catalog) = standard_tree(dir.path());
    add_frames(
        &mut catalog,
        &root.join("darks/wk03"),
        "odc",
        2,
        Category::Dark,
        ModeKey::UNBINNED,
        1,
        114.5,
    );
    let graph = plan(&root, &catalog, &ExternalBaselines::default());

    let dark = graph.get(&NodeKey::PeriodDark(wk(3))).unwrap();
    assert_eq!(
        dark.baselines[1],
        Baseline::Node(NodeKey::BaseBias(ModeKey::UNBINNED))
    );
}

#[test]
fn test_external_baselines_replace_period_baselines() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let external = ExternalBaselines {
        base_bias: Some(PathBuf::from("/prev/basebias.fits")),
        base_dark: Some(PathBuf::from("/prev/basedark.fits")),
    };
    let graph = plan(&root, &catalog, &external);

    let shallow = graph
        .get(&NodeKey::PeriodBias {
            mode: ModeKey::UNBINNED,
            label: wk(2),
        })
        .unwrap();
    assert_eq!(
        shallow.baselines,
        vec![Baseline::External(PathBuf::from("/prev/basebias.fits"))]
    );

    let dark = graph.get(&NodeKey::PeriodDark(wk(1))).unwrap();
    assert_eq!(
        dark.baselines[0],
        Baseline::External(PathBuf::from("/prev/basedark.fits"))
    );

    // This cycle's base artifacts are still planned
    assert!(graph.contains(&NodeKey::BaseBias(ModeKey::UNBINNED)));
    assert!(graph.contains(&NodeKey::BaseDark));
}

#[test]
fn test_darks_only_tree_uses_conventional_base_bias() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("12345_03");
    let mut catalog = CatalogMetadata::new();
    add_frames(&mut catalog, &root.join("darks/wk01"), "od", 2, Category::Dark, ModeKey::UNBINNED, 1, 1.0);

    let graph = plan(&root, &catalog, &ExternalBaselines::default());
    let basedark = graph.get(&NodeKey::BaseDark).unwrap();
    assert_eq!(
        basedark.baselines,
        vec![Baseline::External(
            root.join("biases/1-1x1/all/basebias.fits")
        )]
    );
}

#[test]
fn test_plan_rejects_bad_folders() {
    let dir = tempfile::tempdir().unwrap();

    let root = dir.path().join("mixed");
    let mut catalog = CatalogMetadata::new();
    let folder = root.join("biases/1-1x1/wk01");
    add_frames(&mut catalog, &folder, "oa", 1, Category::Bias, ModeKey::UNBINNED, 1, 1.0);
    add_frames(&mut catalog, &folder, "ob", 1, Category::Bias, ModeKey::new(1, 1, 2), 1, 1.0);
    assert!(matches!(
        plan_err(&root, &catalog),
        RefError::MixedModes { .. }
    ));

    let root = dir.path().join("empty");
    fs::create_dir_all(root.join("darks/wk01")).unwrap();
    assert!(matches!(
        plan_err(&root, &catalog),
        RefError::NoFrames { .. }
    ));

    let root = dir.path().join("stray");
    fs::create_dir_all(root.join("flats/wk01")).unwrap();
    assert!(matches!(
        plan_err(&root, &catalog),
        RefError::UnrecognizedFolder { .. }
    ));

    let root = dir.path().join("unknown");
    let mut catalog = CatalogMetadata::new();
    let mode = ModeKey::new(2, 1, 1);
    add_frames(&mut catalog, &root.join("biases/2-1x1/wk01"), "oa", 1, Category::Bias, mode, 1, 1.0);
    let err = plan_err(&root, &catalog);
    assert!(matches!(err, RefError::UnknownMode { .. }));
    assert!(err.is_configuration());
}

#[test]
fn test_topological_order_respects_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());

    let order = graph.topological_order().unwrap();
    assert_eq!(order.len(), graph.len());
    let position = |k: &NodeKey| order.iter().position(|o| o == k).unwrap();
    for node in graph.nodes() {
        for dep in node.dependencies() {
            assert!(position(&dep) < position(&node.key), "{} before {}", dep, node.key);
        }
    }
    assert_eq!(order[0], NodeKey::BaseBias(ModeKey::UNBINNED));
}

#[test]
fn test_topological_order_detects_cycles() {
    let mut graph = BuildGraph::new("/r");
    let node = |key: NodeKey, dep: NodeKey| BuildNode {
        key,
        recipe: Recipe::BaseDark,
        strategy: Strategy::BaselineAssisted,
        frames: Vec::new(),
        baselines: vec![Baseline::Node(dep)],
        output: PathBuf::from(format!("/r/{}", key)),
        imsets: 0,
    };
    graph.insert(node(NodeKey::BaseDark, NodeKey::PeriodDark(wk(1))));
    graph.insert(node(NodeKey::PeriodDark(wk(1)), NodeKey::BaseDark));

    assert!(matches!(
        graph.topological_order(),
        Err(RefError::DependencyCycle(_))
    ));
}

#[test]
fn test_run_builds_then_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());

    let mut combiner = RecordingCombiner::default();
    let report = BuildOrchestrator::new(&mut combiner, BuildOptions::default())
        .run(&graph)
        .unwrap();
    assert_eq!(report.count(NodeStatus::Built), 6);
    assert_eq!(combiner.calls.len(), 6);
    for node in graph.nodes() {
        assert!(node.output.is_file(), "{} missing", node.output.display());
    }

    // weekdark wk02 received the base dark then the wk02 weekbias
    let dark_call = combiner
        .calls
        .iter()
        .find(|c| c.recipe == Some(Recipe::WeekDark) && c.frames[0].to_string_lossy().contains("odb"))
        .unwrap();
    assert_eq!(
        dark_call.baselines,
        vec![
            root.join("darks/all/basedark.fits"),
            root.join("biases/1-1x1/wk02/weekbias_12345_03_wk02.fits"),
        ]
    );

    let mut second = RecordingCombiner::default();
    let report = BuildOrchestrator::new(&mut second, BuildOptions::default())
        .run(&graph)
        .unwrap();
    assert!(second.calls.is_empty());
    assert_eq!(report.count(NodeStatus::Skipped), 6);
    assert_eq!(report.combine_calls(), 0);
}

#[test]
fn test_no_staging_files_remain() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());
    let mut combiner = RecordingCombiner::default();
    BuildOrchestrator::new(&mut combiner, BuildOptions::default())
        .run(&graph)
        .unwrap();

    let leftovers: Vec<_> = fs::read_dir(root.join("biases/1-1x1/wk01"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_split_average_builds_two_halves() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("12345_03");
    let mut catalog = CatalogMetadata::new();
    let folder = root.join("biases/1-1x1/wk01");
    add_frames(&mut catalog, &folder, "ob", 13, Category::Bias, ModeKey::UNBINNED, 10, 50.0);

    let graph = plan(&root, &catalog, &ExternalBaselines::default());
    let key = NodeKey::PeriodBias {
        mode: ModeKey::UNBINNED,
        label: wk(1),
    };
    assert_eq!(graph.get(&key).unwrap().strategy, Strategy::SplitAverage);

    let mut combiner = RecordingCombiner::default();
    let report = BuildOrchestrator::new(&mut combiner, BuildOptions::default())
        .run(&graph)
        .unwrap();

    let outcome = report.outcome(&key.to_string()).unwrap();
    assert_eq!(outcome.status, NodeStatus::Built);
    assert_eq!(outcome.combine_calls, 3);

    let halves: Vec<&Call> = combiner
        .calls
        .iter()
        .filter(|c| c.recipe == Some(Recipe::RefBias))
        .collect();
    assert_eq!(halves.len(), 2);
    assert_eq!(halves[0].frames.len(), 7);
    assert_eq!(halves[1].frames.len(), 6);
    assert!(halves.iter().all(|c| c.baselines.is_empty()));

    assert!(folder.join("refbias_12345_wk01_grp01.fits").is_file());
    assert!(folder.join("refbias_12345_wk01_grp02.fits").is_file());
    assert_eq!(
        fs::read_to_string(folder.join("refbias_12345_wk01.fits")).unwrap(),
        "average"
    );
}

#[test]
fn test_single_deep_frame_is_combined_directly() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("12345_03");
    let mut catalog = CatalogMetadata::new();
    let folder = root.join("biases/1-1x1/wk01");
    add_frames(&mut catalog, &folder, "ob", 1, Category::Bias, ModeKey::UNBINNED, 150, 50.0);

    let graph = plan(&root, &catalog, &ExternalBaselines::default());
    let key = NodeKey::PeriodBias {
        mode: ModeKey::UNBINNED,
        label: wk(1),
    };
    assert_eq!(graph.get(&key).unwrap().strategy, Strategy::Direct);

    let mut combiner = RecordingCombiner::default();
    let report = BuildOrchestrator::new(&mut combiner, BuildOptions::default())
        .run(&graph)
        .unwrap();

    assert_eq!(report.outcome(&key.to_string()).unwrap().combine_calls, 1);
    assert!(combiner.calls.iter().all(|c| c.frames.len() == 1));
    assert!(combiner.calls.iter().all(|c| c.recipe.is_some()));
    assert!(!folder.join("refbias_12345_wk01_grp01.fits").exists());
}

#[test]
fn test_split_reuses_existing_halves() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("12345_03");
    let mut catalog = CatalogMetadata::new();
    let folder = root.join("biases/1-1x1/wk01");
    add_frames(&mut catalog, &folder, "ob", 13, Category::Bias, ModeKey::UNBINNED, 10, 50.0);
    fs::write(folder.join("refbias_12345_wk01_grp01.fits"), b"half").unwrap();
    fs::write(folder.join("refbias_12345_wk01_grp02.fits"), b"half").unwrap();

    let graph = plan(&root, &catalog, &ExternalBaselines::default());
    let mut combiner = RecordingCombiner::default();
    let report = BuildOrchestrator::new(&mut combiner, BuildOptions::default())
        .run(&graph)
        .unwrap();

    let key = NodeKey::PeriodBias {
        mode: ModeKey::UNBINNED,
        label: wk(1),
    };
    assert_eq!(report.outcome(&key.to_string()).unwrap().combine_calls, 1);
}

#[test]
fn test_keep_going_blocks_dependents_only() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());

    let mut combiner = RecordingCombiner {
        fail_on: Some(Recipe::BaseBias),
        ..Default::default()
    };
    let options = BuildOptions {
        failure_policy: FailurePolicy::KeepGoing,
        dry_run: false,
    };
    let report = BuildOrchestrator::new(&mut combiner, options)
        .run(&graph)
        .unwrap();

    let status = |key: NodeKey| report.outcome(&key.to_string()).unwrap().status;
    assert_eq!(status(NodeKey::BaseBias(ModeKey::UNBINNED)), NodeStatus::Failed);
    assert_eq!(status(NodeKey::BaseDark), NodeStatus::Blocked);
    assert_eq!(
        status(NodeKey::PeriodBias {
            mode: ModeKey::UNBINNED,
            label: wk(1)
        }),
        NodeStatus::Built
    );
    assert_eq!(
        status(NodeKey::PeriodBias {
            mode: ModeKey::UNBINNED,
            label: wk(2)
        }),
        NodeStatus::Blocked
    );
    assert_eq!(status(NodeKey::PeriodDark(wk(1))), NodeStatus::Blocked);
    assert!(report.has_failures());
}

#[test]
fn test_abort_propagates_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());

    let mut combiner = RecordingCombiner {
        fail_on: Some(Recipe::BaseBias),
        ..Default::default()
    };
    let err = BuildOrchestrator::new(&mut combiner, BuildOptions::default())
        .run(&graph)
        .unwrap_err();
    match err {
        RefError::Combine { node, source, .. } => {
            assert_eq!(node, "basebias[1-1x1]");
            assert!(matches!(source, CombineError::Failed(_)));
        }
        other => panic!("expected Combine, got {other:?}"),
    }
    assert_eq!(combiner.calls.len(), 1);
}

#[test]
fn test_combiner_without_output_fails_node() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());

    let mut combiner = RecordingCombiner {
        leave_no_output: true,
        ..Default::default()
    };
    let err = BuildOrchestrator::new(&mut combiner, BuildOptions::default())
        .run(&graph)
        .unwrap_err();
    assert!(matches!(
        err,
        RefError::Combine {
            source: CombineError::MissingOutput(_),
            ..
        }
    ));
    assert!(!root.join("biases/1-1x1/all/basebias.fits").exists());
}

#[test]
fn test_concurrent_publish_keeps_existing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());
    let target = root.join("biases/1-1x1/all/basebias.fits");

    let mut combiner = RecordingCombiner {
        racing_target: Some(target.clone()),
        ..Default::default()
    };
    let report = BuildOrchestrator::new(&mut combiner, BuildOptions::default())
        .run(&graph)
        .unwrap();

    assert_eq!(
        report.outcome("basebias[1-1x1]").unwrap().status,
        NodeStatus::Skipped
    );
    assert_eq!(fs::read_to_string(&target).unwrap(), "other");
    let staged = fs::read_dir(target.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().ends_with(".partial"));
    assert!(!staged);
}

#[test]
fn test_missing_external_baseline_fails_node() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let external = ExternalBaselines {
        base_bias: Some(dir.path().join("missing_basebias.fits")),
        base_dark: None,
    };
    let graph = plan(&root, &catalog, &external);

    let mut combiner = RecordingCombiner::default();
    let options = BuildOptions {
        failure_policy: FailurePolicy::KeepGoing,
        dry_run: false,
    };
    let report = BuildOrchestrator::new(&mut combiner, options)
        .run(&graph)
        .unwrap();
    let shallow = report.outcome("bias[1-1x1/wk02]").unwrap();
    assert_eq!(shallow.status, NodeStatus::Failed);
    assert!(shallow.error.as_deref().unwrap().contains("missing_basebias"));
}

#[test]
fn test_dry_run_plans_without_combining() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    fs::create_dir_all(root.join("darks/all")).unwrap();
    fs::write(root.join("darks/all/basedark.fits"), b"done").unwrap();
    let graph = plan(&root, &catalog, &ExternalBaselines::default());

    let mut combiner = RecordingCombiner::default();
    let options = BuildOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = BuildOrchestrator::new(&mut combiner, options)
        .run(&graph)
        .unwrap();

    assert!(combiner.calls.is_empty());
    assert_eq!(report.count(NodeStatus::Planned), 5);
    assert_eq!(report.count(NodeStatus::Skipped), 1);
    assert!(!root.join("biases/1-1x1/all/basebias.fits").exists());
}

#[test]
fn test_report_renders_text_and_json() {
    let dir = tempfile::tempdir().unwrap();
    let (root, catalog) = standard_tree(dir.path());
    let graph = plan(&root, &catalog, &ExternalBaselines::default());
    let mut combiner = RecordingCombiner::default();
    let report = BuildOrchestrator::new(&mut combiner, BuildOptions::default())
        .run(&graph)
        .unwrap();

    let text = report.render_text();
    assert!(text.contains("bias[1-1x1/wk02]"));
    assert!(text.contains("baseline-assisted"));
    assert!(text.contains("6 built, 0 skipped"));

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["outcomes"].as_array().unwrap().len(), 6);
    assert_eq!(json["outcomes"][0]["status"], "built");
    assert_eq!(json["outcomes"][0]["recipe"], "basebias");
}
