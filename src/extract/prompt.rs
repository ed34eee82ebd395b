use crate::store::SourceRecord;

/// Fixed instruction for every batch of a run.
pub const SYSTEM_PROMPT: &str = "\
你是招投标公告解析专家。用户会给出若干条带 [ID] 标记的公告正文。
对每条公告：
1. 找出最终中标（成交）单位的全称，以及中标（成交）金额，金额只写数字。
2. 忽略“中标候选人”“第一候选人”“排名”“综合得分”等内容，除非公告明确写明该单位已中标。
3. 公告中没有明确中标单位的，不要输出该 ID。
4. 只返回 JSON，格式如下，每条结果必须带上原始 ID：
{\"results\": [{\"id\": 0, \"winner\": \"公司A\", \"amount\": \"123.45\"}, {\"id\": 3, \"winner\": \"公司B\", \"amount\": \"null\"}]}
金额未写明时 amount 填 \"null\"。";

/// User message for one batch: keyword context plus one tagged excerpt per record.
pub fn user_prompt(batch: &[SourceRecord], keyword: &str, excerpt_chars: usize) -> String {
    let mut prompt = format!(
        "分析以下公告，识别中标单位和中标金额。必须以 JSON 返回并保留每条公告的 ID。关键词：{}\n\n",
        keyword
    );
    for record in batch {
        prompt.push_str(&format!(
            "--- [ID: {}] ---\n内容: {}\n\n",
            record.id,
            excerpt(&record.content, excerpt_chars)
        ));
    }
    prompt.push_str("请务必以 JSON 格式返回。");
    prompt
}

/// First `max` characters of `s`, never splitting a character.
fn excerpt(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
