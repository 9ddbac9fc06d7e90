//! アプリケーション設定管理モジュール
//!
//! 計算デバイスやデータセット・モデルのパス、学習設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// CPU バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU"),
        }
    }
}

/// データセット設定
///
/// data_dir直下に train / val / test の3分割ディレクトリを置き、
/// それぞれのクラスサブディレクトリ (not fractured / fractured) に画像を配置する。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// データセットのルートディレクトリ
    pub data_dir: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl DataSettings {
    /// 学習データのディレクトリ
    pub fn train_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("train")
    }

    /// 検証データのディレクトリ
    pub fn val_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("val")
    }

    /// テストデータのディレクトリ
    pub fn test_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("test")
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 学習済みモデル(tar.gz)の保存先パス
    pub model_path: String,
    /// 学習履歴CSVの出力先パス
    pub history_path: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/fracture_classifier.tar.gz".to_string(),
            history_path: "training.log".to_string(),
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// データローダーのワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// シャッフル用のランダムシード
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            batch_size: 64,
            num_workers: 1,
            learning_rate: 1e-3,
            seed: 42,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// データセット設定
    pub data: DataSettings,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    println!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    eprintln!(
                        "警告: 設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    eprintln!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            println!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("データディレクトリ: {}", self.data.data_dir);
        println!("モデルパス: {}", self.model.model_path);
        println!("学習履歴パス: {}", self.model.history_path);
        println!("\n--- トレーニング設定 ---");
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("シード: {}", self.training.seed);
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.training.num_epochs, 10);
        assert_eq!(config.training.batch_size, 64);
        assert_eq!(config.data.data_dir, "data");
    }

    #[test]
    fn test_split_dirs() {
        let data = DataSettings::default();
        assert_eq!(data.train_dir(), PathBuf::from("data/train"));
        assert_eq!(data.val_dir(), PathBuf::from("data/val"));
        assert_eq!(data.test_dir(), PathBuf::from("data/test"));
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.model_path, deserialized.model.model_path);
        assert_eq!(config.training.seed, deserialized.training.seed);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "fracture_classifier_config_test_{}.json",
            std::process::id()
        ));

        let mut config = AppConfig::default();
        config.device_type = DeviceType::Cpu;
        config.training.num_epochs = 3;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.device_type, DeviceType::Cpu);
        assert_eq!(loaded.training.num_epochs, 3);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU");
    }
}
