//! モデル学習と学習履歴の記録
//!
//! train/valディレクトリからデータローダーを構築し、Learnerで固定エポック数の
//! 学習を実行します。学習後はモデルの重みとメタデータをtar.gzに保存し、
//! エポックごとの損失・正解率をCSV形式の学習履歴として書き出します。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use burn::{
    backend::{Autodiff, Wgpu},
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::Module,
    optim::AdamConfig,
    record::{BinFileRecorder, FullPrecisionSettings},
    tensor::backend::{AutodiffBackend, Backend},
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};
use burn_wgpu::WgpuDevice;

use crate::ml::cnn::{FractureClassifier, ModelConfig, CLASS_NAMES, IMAGE_SIZE};
use crate::ml::dataset::{FractureBatch, FractureBatcher, FractureDataset};
use crate::model::config::{AppConfig, DeviceType};
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::save_model_with_metadata;

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<FractureBatch<B>, ClassificationOutput<B>>
    for FractureClassifier<B>
{
    fn step(&self, batch: FractureBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<FractureBatch<B>, ClassificationOutput<B>> for FractureClassifier<B> {
    fn step(&self, batch: FractureBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 設定からWGPUデバイスを選択
pub fn select_device(device_type: &DeviceType) -> WgpuDevice {
    match device_type {
        DeviceType::Wgpu => WgpuDevice::DiscreteGpu(0),
        DeviceType::Cpu => WgpuDevice::Cpu,
    }
}

/// モデル学習を実行
///
/// train/valディレクトリで学習・検証し、学習済みモデルを
/// `config.model.model_path` のtar.gzへ、学習履歴CSVを
/// `config.model.history_path` へ書き出す。
pub fn train_model(config: &AppConfig) -> Result<String> {
    let train_dir = config.data.train_dir();
    let val_dir = config.data.val_dir();

    let dataset_train = FractureDataset::from_split_dir(&train_dir)
        .context(format!("学習データの読み込みに失敗: {}", train_dir.display()))?;
    let dataset_val = FractureDataset::from_split_dir(&val_dir)
        .context(format!("検証データの読み込みに失敗: {}", val_dir.display()))?;

    println!("学習データ: {} 枚", dataset_train.len());
    for (name, count) in CLASS_NAMES.iter().zip(dataset_train.class_counts()) {
        println!("  クラス '{}': {} 枚", name, count);
    }
    println!("検証データ: {} 枚", dataset_val.len());

    let device = select_device(&config.device_type);
    println!("使用デバイス: {:?} ({})", device, config.device_type);

    let training = &config.training;
    println!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}",
        training.num_epochs, training.batch_size, training.learning_rate
    );

    // バッチャー作成
    let batcher_train = FractureBatcher::<Autodiff<Wgpu>>::new(device.clone(), IMAGE_SIZE);
    let batcher_val = FractureBatcher::<Wgpu>::new(device.clone(), IMAGE_SIZE);

    // データローダー作成（学習側のみエポックごとにシャッフル）
    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(training.batch_size)
        .shuffle(training.seed)
        .num_workers(training.num_workers)
        .build(dataset_train);

    let dataloader_val = DataLoaderBuilder::new(batcher_val)
        .batch_size(training.batch_size)
        .num_workers(training.num_workers)
        .build(dataset_val);

    // モデル初期化
    let model = ModelConfig::new().init::<Autodiff<Wgpu>>(&device);

    // アーティファクトディレクトリ（前回のメトリクスログが残らないよう作り直す）
    let artifact_dir = std::env::temp_dir().join("fracture_classifier_training");
    std::fs::remove_dir_all(&artifact_dir).ok();
    std::fs::create_dir_all(&artifact_dir)?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(training.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), training.learning_rate);

    println!("学習を開始します...");
    let model_trained = learner.fit(dataloader_train, dataloader_val);
    println!("学習が完了しました");

    // 学習履歴CSVを書き出す（失敗しても学習結果は保存する）
    let history_path = PathBuf::from(&config.model.history_path);
    if let Err(e) = write_history_csv(&artifact_dir, &history_path, training.num_epochs) {
        eprintln!("警告: 学習履歴CSVの書き出しに失敗しました: {}", e);
    } else {
        println!("学習履歴を保存しました: {}", history_path.display());
    }

    // 学習済みの重みをバイナリ形式で書き出す
    let trained_model = model_trained.model;
    let weights_path = artifact_dir.join("model");
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    trained_model
        .save_file(&weights_path, &recorder)
        .context("モデル重みの保存に失敗")?;

    let model_binary = std::fs::read(weights_path.with_extension("bin"))
        .context("保存したモデル重みの読み込みに失敗")?;
    println!(
        "モデルバイナリサイズ: {:.2} MB",
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    // メタデータと共にtar.gzへ保存
    let model_path = PathBuf::from(&config.model.model_path);
    let metadata = ModelMetadata::new(IMAGE_SIZE as u32, training.num_epochs as u32);
    save_model_with_metadata(&model_path, &metadata, &model_binary)?;

    // アーティファクトディレクトリをクリーンアップ
    std::fs::remove_dir_all(&artifact_dir).ok();

    Ok(format!("学習完了: {} に保存しました", model_path.display()))
}

/// Learnerが書き出したエポックごとのメトリクスログを集計してCSVに変換する
///
/// 列構成はKerasのCSVLoggerに合わせる:
/// `epoch,binary_accuracy,loss,val_binary_accuracy,val_loss`
///
/// ログが読めないエポックは警告を出して行をスキップする。
fn write_history_csv(artifact_dir: &Path, history_path: &Path, num_epochs: usize) -> Result<()> {
    if let Some(parent) = history_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(history_path)
        .context(format!("学習履歴CSVを作成できません: {}", history_path.display()))?;
    writer.write_record([
        "epoch",
        "binary_accuracy",
        "loss",
        "val_binary_accuracy",
        "val_loss",
    ])?;

    for epoch in 1..=num_epochs {
        let row = (
            mean_metric(artifact_dir, "train", epoch, "Accuracy"),
            mean_metric(artifact_dir, "train", epoch, "Loss"),
            mean_metric(artifact_dir, "valid", epoch, "Accuracy"),
            mean_metric(artifact_dir, "valid", epoch, "Loss"),
        );

        match row {
            (Some(acc), Some(loss), Some(val_acc), Some(val_loss)) => {
                // AccuracyMetricは百分率で記録されるため0-1スケールに直す
                writer.write_record(&[
                    epoch.to_string(),
                    format!("{:.6}", acc / 100.0),
                    format!("{:.6}", loss),
                    format!("{:.6}", val_acc / 100.0),
                    format!("{:.6}", val_loss),
                ])?;
            }
            _ => {
                eprintln!("警告: エポック{}のメトリクスログが読めませんでした", epoch);
            }
        }
    }

    writer.flush()?;
    Ok(())
}

/// 1エポック分のメトリクスログの平均値を計算
///
/// ログはLearnerが `<artifact_dir>/<split>/epoch-<n>/<Metric>.log` に
/// 1ステップ1行で書き出したもの。
fn mean_metric(artifact_dir: &Path, split: &str, epoch: usize, metric: &str) -> Option<f64> {
    let path = artifact_dir
        .join(split)
        .join(format!("epoch-{}", epoch))
        .join(format!("{}.log", metric));

    let content = std::fs::read_to_string(path).ok()?;
    let values: Vec<f64> = content
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
