//! 骨折X線画像分類ツールのエントリポイント
//!
//! config.json（無ければデフォルト設定）を読み込み、
//! train / predict / evaluate のいずれかを実行します。

use anyhow::{Context, Result};
use std::path::PathBuf;

use burn::backend::Wgpu;
use fracture_classifier::ml::{select_device, train_model, InferenceEngine};
use fracture_classifier::model::{print_metadata_info, AppConfig};

fn main() -> Result<()> {
    let config = AppConfig::load_or_default();
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("train") => {
            config.display();
            let message = train_model(&config)?;
            println!("{}", message);
        }
        Some("predict") => {
            let image_path = args
                .get(2)
                .map(PathBuf::from)
                .context("使い方: fracture-classifier predict <画像ファイル>")?;

            let device = select_device(&config.device_type);
            let engine = InferenceEngine::<Wgpu>::load(&config.model.model_path, device)?;
            print_metadata_info(engine.metadata());

            let prediction = engine.predict_image(&image_path)?;
            println!(
                "{}: {:.4} -> {}",
                image_path.display(),
                prediction.probability,
                prediction.label
            );
        }
        Some("evaluate") => {
            let device = select_device(&config.device_type);
            let engine = InferenceEngine::<Wgpu>::load(&config.model.model_path, device)?;

            let test_dir = config.data.test_dir();
            let accuracy = engine.evaluate(&test_dir, config.training.batch_size)?;
            println!("Test Accuracy: {:.4}", accuracy);
        }
        _ => {
            println!("骨折X線画像分類ツール");
            println!();
            println!("使い方:");
            println!("  fracture-classifier train              学習を実行してモデルを保存");
            println!("  fracture-classifier predict <画像>     単一画像の骨折判定");
            println!("  fracture-classifier evaluate           テストデータで正解率を計算");
            println!();
            println!("設定は {} から読み込まれます", AppConfig::default_path().display());
        }
    }

    Ok(())
}
