//! X線画像から骨折の有無を判定するCNN分類器
//!
//! - `model`: 設定ファイル、モデルメタデータ、tar.gz形式での永続化
//! - `ml`: CNNモデル、データセット、学習、推論

#![recursion_limit = "256"]

pub mod ml;
pub mod model;
