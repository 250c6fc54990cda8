pub const POST_HOT_RANKING: &str = "post:ranking";
pub const POST_TIME_RANKING: &str = "post:time";

pub fn post_summary(post_id: i64) -> String {
    format!("post:id:{}", post_id)
}

pub fn blacklisted_token(token: &str) -> String {
    format!("blacklist:token:{}", token)
}
