//! 骨折判定用CNNモデルの定義
//!
//! X線画像を「骨折あり / 骨折なし」の2クラスに分類するモデルと
//! 画像の読み込み・正規化ヘルパーを提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::BinaryCrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// クラス名の定義（インデックスがクラスIDに対応）
pub const CLASS_NAMES: [&str; 2] = ["not fractured", "fractured"];

/// モデル入力の画像サイズ（正方形）
pub const IMAGE_SIZE: usize = 128;

/// 判定しきい値: シグモイド確率がこの値より大きければ "fractured"
pub const THRESHOLD: f32 = 0.5;

/// Conv+Poolブロックの数
const CONV_BLOCKS: usize = 5;

/// 全ブロック通過後の特徴マップの一辺を計算
///
/// 各ブロックで padding無し3x3 Conv がサイズを2減らし、
/// 2x2 (stride 2) MaxPool が半減（切り捨て）させる。
pub fn feature_map_size(image_size: usize) -> usize {
    let mut size = image_size;
    for _ in 0..CONV_BLOCKS {
        size = size.saturating_sub(2) / 2;
    }
    size
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 入力画像サイズ（正方形）
    #[config(default = 128)]
    pub image_size: usize,
    /// 全結合層の隠れ次元
    #[config(default = 512)]
    pub hidden_size: usize,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> FractureClassifier<B> {
        let fmap = feature_map_size(self.image_size);
        if fmap == 0 {
            panic!(
                "入力サイズが小さすぎます: {} (最小94x94が必要)",
                self.image_size
            );
        }

        // Flatten後の特徴次元 = 最終チャネル数 128 x 特徴マップ面積
        let d = 128 * fmap * fmap;

        FractureClassifier {
            conv1: Conv2dConfig::new([3, 32], [3, 3]).with_stride([1, 1]).init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3]).with_stride([1, 1]).init(device),
            conv3: Conv2dConfig::new([64, 128], [3, 3]).with_stride([1, 1]).init(device),
            conv4: Conv2dConfig::new([128, 128], [3, 3]).with_stride([1, 1]).init(device),
            conv5: Conv2dConfig::new([128, 128], [3, 3]).with_stride([1, 1]).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(d, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, 1).init(device),
            activation: Relu::new(),
        }
    }
}

/// 骨折判定用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (padding無し) + ReLU + MaxPool 2x2} x 5ブロック (32/64/128/128/128チャネル)
/// - Flatten
/// - FC: d -> 512 + ReLU
/// - FC: 512 -> 1
/// - Sigmoid (確率への変換時)
#[derive(Module, Debug)]
pub struct FractureClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 32
    conv2: Conv2d<B>, // 32 -> 64
    conv3: Conv2d<B>, // 64 -> 128
    conv4: Conv2d<B>, // 128 -> 128
    conv5: Conv2d<B>, // 128 -> 128
    pool: MaxPool2d,  // 2x2 stride 2（全ブロック共通）

    fc1: Linear<B>, // d -> 512
    fc2: Linear<B>, // 512 -> 1

    activation: Relu,
}

impl<B: Backend> FractureClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - シグモイド前のロジット [batch_size, 1]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.pool.forward(self.activation.forward(self.conv1.forward(images)));
        let x = self.pool.forward(self.activation.forward(self.conv2.forward(x)));
        let x = self.pool.forward(self.activation.forward(self.conv3.forward(x)));
        let x = self.pool.forward(self.activation.forward(self.conv4.forward(x)));
        let x = self.pool.forward(self.activation.forward(self.conv5.forward(x)));

        // Flatten
        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.activation.forward(self.fc1.forward(x));
        self.fc2.forward(x)
    }

    /// 骨折確率を予測
    ///
    /// # 戻り値
    /// - シグモイド確率 [batch_size, 1]、各値は [0,1]
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(images))
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    /// - `targets`: ターゲットラベル [batch_size]（0 または 1）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let [batch_size, _] = output.dims();

        let logits = output.clone().reshape([batch_size]);
        let loss = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&output.device())
            .forward(logits, targets.clone());

        // AccuracyMetricはクラスごとのスコア列を期待するため、単一ロジットから
        // 2クラス分のスコアを合成する。argmaxが1になるのは logit > 0 (= 確率 > 0.5) のとき
        let scores = Tensor::cat(vec![output.zeros_like(), output], 1);

        ClassificationOutput::new(loss, scores, targets)
    }
}

/// 画像を読み込んで正規化（サイズ指定版）
///
/// 必要ならモデル入力サイズへバイリニア縮小し、画素値を[0,1]へスケーリングします。
///
/// # 戻り値
/// - RGB画像データ (C, H, W) の順で平坦化
pub fn load_and_normalize_image_with_size(
    path: &std::path::Path,
    target_size: usize,
) -> anyhow::Result<Vec<f32>> {
    let img = image::open(path)?.to_rgb8();
    let size = target_size as u32;

    let img = if img.dimensions() == (size, size) {
        img
    } else {
        image::imageops::resize(&img, size, size, image::imageops::FilterType::Triangle)
    };

    let mut data = Vec::with_capacity(3 * target_size * target_size);

    for channel in 0..3 {
        for y in 0..size {
            for x in 0..size {
                let pixel = img.get_pixel(x, y);
                data.push(pixel[channel] as f32 / 255.0);
            }
        }
    }

    Ok(data)
}

/// 画像を読み込んで正規化（デフォルトサイズ版）
pub fn load_and_normalize_image(path: &std::path::Path) -> anyhow::Result<Vec<f32>> {
    load_and_normalize_image_with_size(path, IMAGE_SIZE)
}
