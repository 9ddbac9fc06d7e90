//! 学習・評価用データセットとバッチャー
//!
//! 分割ディレクトリ(train/val/test)内のクラスサブディレクトリから画像パスを列挙し、
//! バッチ作成時にオンデマンドで読み込み・正規化します。

use anyhow::Result;
use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::{backend::Backend, Int, Tensor};

use crate::ml::cnn::{load_and_normalize_image_with_size, CLASS_NAMES};

/// データセットアイテム（画像パスとラベルのみ保持）
#[derive(Clone, Debug)]
pub struct FractureItem {
    pub path: PathBuf,
    pub label: usize,
}

/// 骨折X線画像データセット（パスのリストのみ保持）
pub struct FractureDataset {
    samples: Vec<(PathBuf, usize)>,
}

impl FractureDataset {
    /// 分割ディレクトリからサンプル一覧を構築する
    ///
    /// クラス名のサブディレクトリ (not fractured / fractured) がラベルになる。
    /// クラスサブディレクトリが無い場合はスキップし、画像が1枚も無ければエラー。
    pub fn from_split_dir(split_dir: &Path) -> Result<Self> {
        let mut samples = Vec::new();

        for (class_id, class_name) in CLASS_NAMES.iter().enumerate() {
            let class_dir = split_dir.join(class_name);
            if !class_dir.exists() {
                continue;
            }

            for entry in std::fs::read_dir(&class_dir)? {
                let path = entry?.path();
                if path.is_file() && is_image_file(&path) {
                    samples.push((path, class_id));
                }
            }
        }

        if samples.is_empty() {
            anyhow::bail!("画像が見つかりません: {}", split_dir.display());
        }

        Ok(Self { samples })
    }

    /// クラスごとのサンプル数を取得
    pub fn class_counts(&self) -> [usize; CLASS_NAMES.len()] {
        let mut counts = [0; CLASS_NAMES.len()];
        for (_, label) in &self.samples {
            counts[*label] += 1;
        }
        counts
    }
}

impl Dataset<FractureItem> for FractureDataset {
    fn get(&self, index: usize) -> Option<FractureItem> {
        let (path, label) = self.samples.get(index)?;
        Some(FractureItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// 拡張子で画像ファイルかどうかを判定
fn is_image_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg")
    )
}

/// バッチャー
#[derive(Clone)]
pub struct FractureBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> FractureBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct FractureBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, FractureItem, FractureBatch<B>> for FractureBatcher<B> {
    fn batch(&self, items: Vec<FractureItem>, _device: &B::Device) -> FractureBatch<B> {
        let batch_size = items.len();
        let image_size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * image_size * image_size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            // 画像をロードして正規化（CPUメモリ上）
            match load_and_normalize_image_with_size(&item.path, image_size) {
                Ok(image_data) => {
                    all_pixels.extend_from_slice(&image_data);
                    targets_vec.push(item.label as i64);
                }
                Err(e) => {
                    eprintln!("警告: 画像読み込み失敗 {}: {}", item.path.display(), e);
                    // エラーの場合はゼロで埋める
                    all_pixels.extend(vec![0.0f32; 3 * image_size * image_size]);
                    targets_vec.push(item.label as i64);
                }
            }
        }

        // 1回の転送でバッチ全体をデバイスメモリへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, image_size, image_size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        FractureBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    /// 分割ディレクトリのテスト用フィクスチャを作成する
    /// 各クラスに32x32のPNGを`per_class`枚ずつ配置する
    fn create_fixture(name: &str, per_class: usize) -> PathBuf {
        let split_dir = std::env::temp_dir().join(format!(
            "fracture_classifier_dataset_test_{}_{}",
            name,
            std::process::id()
        ));
        std::fs::remove_dir_all(&split_dir).ok();

        for class_name in CLASS_NAMES {
            let class_dir = split_dir.join(class_name);
            std::fs::create_dir_all(&class_dir).unwrap();
            for i in 0..per_class {
                let img = image::RgbImage::from_pixel(32, 32, image::Rgb([128, 128, 128]));
                img.save(class_dir.join(format!("img_{}.png", i))).unwrap();
            }
        }

        split_dir
    }

    #[test]
    fn test_from_split_dir() {
        let split_dir = create_fixture("from_split_dir", 3);

        let dataset = FractureDataset::from_split_dir(&split_dir).unwrap();
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.class_counts(), [3, 3]);

        // ラベルはクラスIDと一致する
        let labels: Vec<usize> = (0..dataset.len())
            .map(|i| dataset.get(i).unwrap().label)
            .collect();
        assert_eq!(labels.iter().filter(|&&l| l == 0).count(), 3);
        assert_eq!(labels.iter().filter(|&&l| l == 1).count(), 3);

        std::fs::remove_dir_all(&split_dir).ok();
    }

    #[test]
    fn test_empty_split_dir_is_error() {
        let split_dir = std::env::temp_dir().join(format!(
            "fracture_classifier_dataset_test_empty_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&split_dir).unwrap();

        assert!(FractureDataset::from_split_dir(&split_dir).is_err());

        std::fs::remove_dir_all(&split_dir).ok();
    }

    #[test]
    fn test_batcher_shapes() {
        let split_dir = create_fixture("batcher", 2);
        let dataset = FractureDataset::from_split_dir(&split_dir).unwrap();

        let device = Default::default();
        let batcher = FractureBatcher::<TestBackend>::new(device, 128);

        let items: Vec<FractureItem> = (0..dataset.len()).map(|i| dataset.get(i).unwrap()).collect();
        let batch = batcher.batch(items, &Default::default());

        assert_eq!(batch.images.dims(), [4, 3, 128, 128]);
        assert_eq!(batch.targets.dims(), [4]);

        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![0, 0, 1, 1]);

        std::fs::remove_dir_all(&split_dir).ok();
    }

    #[test]
    fn test_batcher_zero_fills_undecodable_image() {
        let split_dir = create_fixture("corrupt", 1);
        // デコードできないファイルをクラスディレクトリに追加
        let corrupt_path = split_dir.join(CLASS_NAMES[1]).join("broken.png");
        std::fs::write(&corrupt_path, b"this is not a png").unwrap();

        let dataset = FractureDataset::from_split_dir(&split_dir).unwrap();
        assert_eq!(dataset.len(), 3);

        let batcher = FractureBatcher::<TestBackend>::new(Default::default(), 128);
        let items: Vec<FractureItem> =
            (0..dataset.len()).map(|i| dataset.get(i).unwrap()).collect();
        let batch = batcher.batch(items, &Default::default());

        // 壊れた画像もバッチから脱落せず、ラベルは保持される
        assert_eq!(batch.images.dims(), [3, 3, 128, 128]);
        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets.iter().filter(|&&t| t == 1).count(), 2);

        // 壊れた画像の1枚だけがゼロ埋めになる（正常画像はグレーで非ゼロ）
        let pixels = batch.images.into_data().to_vec::<f32>().unwrap();
        let per_image = 3 * 128 * 128;
        let zeroed = pixels
            .chunks(per_image)
            .filter(|chunk| chunk.iter().all(|&v| v == 0.0))
            .count();
        assert_eq!(zeroed, 1);

        std::fs::remove_dir_all(&split_dir).ok();
    }
}
