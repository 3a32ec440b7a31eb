pub const TOPIC_PREFIX: &str = "esp-brew-engine";

pub fn history_topic(hostname: &str) -> String {
    format!("{TOPIC_PREFIX}/{hostname}/history")
}

pub fn log_topic(hostname: &str) -> String {
    format!("{TOPIC_PREFIX}/{hostname}/log")
}
