use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("clipsearch_search_count", "count of the searches", &["kind"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "clipsearch_search_duration",
        "duration of the per-query search in seconds",
        &["kind"]
    )
    .unwrap()
});

static METRIC_BUILD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "clipsearch_build_duration",
        "duration of the index build in seconds",
        vec![1., 5., 15., 30., 60., 120., 300., 600., 1800., 3600.]
    )
    .unwrap()
});

static METRIC_INDEXED_IMAGES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("clipsearch_indexed_images", "number of images in the index").unwrap()
});

/// 查询类型
#[derive(Debug, Clone, Copy)]
pub enum SearchKind {
    Image,
    Text,
}

impl SearchKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
        }
    }
}

/// 记录一次查询
pub fn inc_search(kind: SearchKind, duration: f32) {
    METRIC_SEARCH_COUNT.with_label_values(&[kind.as_str()]).inc();
    METRIC_SEARCH_DURATION.with_label_values(&[kind.as_str()]).observe(duration as f64);
}

/// 记录一次索引构建
pub fn observe_build(duration: f32) {
    METRIC_BUILD_DURATION.observe(duration as f64);
}

/// 设置当前索引中的图片数量
pub fn set_indexed_images(count: usize) {
    METRIC_INDEXED_IMAGES.set(count as i64);
}

/// 以文本格式导出所有指标
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    Ok(encoder.encode_to_string(&prometheus::gather())?)
}
