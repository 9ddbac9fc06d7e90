//! モデルメタデータの定義
//!
//! tar.gz形式でモデルの重みと共に保存される情報を定義します。
//! クラスラベルの割り当てと判定しきい値はここに記録された値が推論時の正です。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::cnn::{CLASS_NAMES, THRESHOLD};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（インデックスがクラスIDに対応）
    /// 例: ["not fractured", "fractured"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（正方形、ピクセル）
    pub image_size: u32,

    /// 判定しきい値: シグモイド確率がこの値より大きければクラス1
    pub threshold: f32,

    /// 学習エポック数
    pub num_epochs: u32,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(image_size: u32, num_epochs: u32) -> Self {
        Self {
            class_labels: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            image_size,
            threshold: THRESHOLD,
            num_epochs,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metadata() {
        let metadata = ModelMetadata::new(128, 10);
        assert_eq!(metadata.class_labels, vec!["not fractured", "fractured"]);
        assert_eq!(metadata.image_size, 128);
        assert_eq!(metadata.threshold, 0.5);
        assert_eq!(metadata.num_epochs, 10);
    }

    #[test]
    fn test_json_round_trip() {
        let metadata = ModelMetadata::new(128, 10);
        let json = metadata.to_json_string().unwrap();
        let restored = ModelMetadata::from_json_string(&json).unwrap();

        assert_eq!(metadata.class_labels, restored.class_labels);
        assert_eq!(metadata.image_size, restored.image_size);
        assert_eq!(metadata.trained_at, restored.trained_at);
    }
}
