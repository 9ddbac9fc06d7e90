//! モデル推論機能
//!
//! tar.gzに保存された学習済みモデルを復元し、単一画像の骨折判定と
//! テストデータセットの評価を行います。

use anyhow::Result;
use std::path::Path;

use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::ml::cnn::{load_and_normalize_image_with_size, FractureClassifier, ModelConfig, CLASS_NAMES};
use crate::ml::dataset::{FractureBatcher, FractureDataset};
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::load_model_with_metadata;

/// 予測結果
#[derive(Debug, Clone)]
pub struct Prediction {
    /// 骨折確率（シグモイド出力、[0,1]）
    pub probability: f32,
    /// 確率から導出したクラスラベル
    pub label: String,
}

/// 確率からラベル文字列を導出
///
/// しきい値より大きければ "fractured"、それ以外は "not fractured"。
pub fn label_for(probability: f32, threshold: f32) -> &'static str {
    if probability > threshold {
        CLASS_NAMES[1]
    } else {
        CLASS_NAMES[0]
    }
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: FractureClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// 指定デバイスでモデルを読み込んで推論エンジンを初期化
    ///
    /// デバイスは学習時と同様に設定から選択する（`select_device`参照）。
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;

        // メタデータに記録された入力サイズでモデルを再構築
        let model = ModelConfig::new()
            .with_image_size(metadata.image_size as usize)
            .init::<B>(&device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        Ok(Self {
            model,
            metadata,
            device,
        })
    }

    /// 単一画像の骨折確率とラベルを予測
    pub fn predict_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let image_size = self.metadata.image_size as usize;
        let image_data = load_and_normalize_image_with_size(image_path.as_ref(), image_size)?;

        // Tensorに変換 [1, 3, size, size]
        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device)
            .reshape([1, 3, image_size, image_size]);

        let probability = self
            .model
            .predict(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?[0];

        Ok(Prediction {
            probability,
            label: label_for(probability, self.metadata.threshold).to_string(),
        })
    }

    /// 複数画像をまとめて予測
    pub fn predict_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<Prediction>> {
        let mut results = Vec::with_capacity(image_paths.len());

        for path in image_paths {
            results.push(self.predict_image(path)?);
        }

        Ok(results)
    }

    /// 分割ディレクトリ全体での正解率を計算
    pub fn evaluate(&self, split_dir: &Path, batch_size: usize) -> Result<f32> {
        let dataset = FractureDataset::from_split_dir(split_dir)?;
        let total = dataset.len();

        let batcher =
            FractureBatcher::<B>::new(self.device.clone(), self.metadata.image_size as usize);
        let dataloader = DataLoaderBuilder::new(batcher)
            .batch_size(batch_size)
            .build(dataset);

        let mut correct = 0usize;
        for batch in dataloader.iter() {
            let probs = self
                .model
                .predict(batch.images)
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;
            let targets = batch
                .targets
                .into_data()
                .to_vec::<i32>()
                .map_err(|e| anyhow::anyhow!("ターゲットの取得エラー: {:?}", e))?;

            for (prob, target) in probs.iter().zip(targets.iter()) {
                let predicted = if *prob > self.metadata.threshold { 1 } else { 0 };
                if predicted == *target {
                    correct += 1;
                }
            }
        }

        Ok(correct as f32 / total as f32)
    }

    /// モデルメタデータへの参照を取得
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::model_storage::save_model_with_metadata;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_label_for_threshold() {
        assert_eq!(label_for(0.9, 0.5), "fractured");
        assert_eq!(label_for(0.1, 0.5), "not fractured");
        // しきい値ちょうどは "not fractured"（判定は strict greater）
        assert_eq!(label_for(0.5, 0.5), "not fractured");
    }

    #[test]
    fn test_label_for_custom_threshold() {
        assert_eq!(label_for(0.6, 0.8), "not fractured");
        assert_eq!(label_for(0.9, 0.8), "fractured");
    }

    #[test]
    fn test_load_and_predict_on_cpu_device() {
        let device = Default::default();

        // 最小入力サイズのモデルを作成して重みバイト列に変換
        let image_size = 94;
        let model = ModelConfig::new()
            .with_image_size(image_size)
            .init::<TestBackend>(&device);
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let model_binary = recorder.record(model.into_record(), ()).unwrap();

        // tar.gzに保存
        let bundle_path = std::env::temp_dir().join(format!(
            "fracture_classifier_inference_test_{}.tar.gz",
            std::process::id()
        ));
        let metadata = ModelMetadata::new(image_size as u32, 1);
        save_model_with_metadata(&bundle_path, &metadata, &model_binary).unwrap();

        // 入力画像
        let image_path = std::env::temp_dir().join(format!(
            "fracture_classifier_inference_test_{}.png",
            std::process::id()
        ));
        let img = image::RgbImage::from_pixel(64, 64, image::Rgb([200, 200, 200]));
        img.save(&image_path).unwrap();

        // CPUバックエンドのデバイスで復元・推論できる
        let engine = InferenceEngine::<TestBackend>::load(&bundle_path, device).unwrap();
        assert_eq!(engine.metadata().image_size, image_size as u32);

        let prediction = engine.predict_image(&image_path).unwrap();
        assert!((0.0..=1.0).contains(&prediction.probability));
        assert!(CLASS_NAMES.contains(&prediction.label.as_str()));

        std::fs::remove_file(&bundle_path).ok();
        std::fs::remove_file(&image_path).ok();
    }
}
