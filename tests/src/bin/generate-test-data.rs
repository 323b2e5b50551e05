use anyhow::Context;
use chrono::{Duration, Utc};
use convo_api::{Comment, CommentId, ConversationId, Time, UserId, Vote};
use convo_mock_server::{Fixture, FixtureConversation};
use rand::{seq::SliceRandom, Rng};

const NUM_CONVERSATIONS: usize = 2;
const NUM_USERS: usize = 8;

const NUM_TOP_LEVEL: usize = 40;
const NUM_REPLIES: usize = 120;
const MAX_DEPTH: u32 = 3;

const COMMENT_MIN_WORDS: usize = 3;
const COMMENT_MAX_WORDS: usize = 40;
const DELETED_RATIO: f64 = 0.05;
const EDITED_RATIO: f64 = 0.1;

fn gen_text(rng: &mut impl Rng) -> String {
    lipsum::lipsum_words(rng.gen_range(COMMENT_MIN_WORDS..=COMMENT_MAX_WORDS))
}

fn gen_comment(rng: &mut impl Rng, c: &mut Comment, users: &[UserId], time: &mut Time) {
    // Replies always come after their parent
    *time = *time + Duration::seconds(rng.gen_range(1..600));
    c.created_at = *time;
    c.author_id = users[rng.gen_range(0..users.len())].clone();
    c.deleted = rng.gen_bool(DELETED_RATIO);
    c.edited = rng.gen_bool(EDITED_RATIO);
    c.rank.up = rng.gen_range(0..50);
    c.rank.down = rng.gen_range(0..10);
    c.rank.current_user_vote = *[Vote::None, Vote::None, Vote::Up, Vote::Down]
        .choose(rng)
        .unwrap_or(&Vote::None);
}

fn gen_conversation(rng: &mut impl Rng, id: ConversationId, users: &[UserId]) -> FixtureConversation {
    let mut time = Utc::now() - Duration::days(7);
    let mut comments: Vec<Comment> = Vec::new();
    for i in 0..NUM_TOP_LEVEL + NUM_REPLIES {
        let cid = CommentId(format!("{}-{}", id, i));
        let author = users[0].clone();
        let replyable = comments
            .iter()
            .filter(|c| c.depth < MAX_DEPTH)
            .collect::<Vec<_>>();
        let mut c = match (i < NUM_TOP_LEVEL, replyable.choose(rng)) {
            (false, Some(parent)) => Comment::new_reply(parent, cid, author, &gen_text(rng)),
            _ => Comment::new_top_level(cid, author, &gen_text(rng)),
        };
        gen_comment(rng, &mut c, users, &mut time);
        comments.push(c);
    }
    FixtureConversation { id, comments }
}

fn main() -> anyhow::Result<()> {
    let mut rng = rand::thread_rng();
    let users = (0..NUM_USERS)
        .map(|i| UserId(format!("user{}", i)))
        .collect::<Vec<_>>();
    let fixture = Fixture {
        conversations: (0..NUM_CONVERSATIONS)
            .map(|i| gen_conversation(&mut rng, ConversationId(format!("conv{}", i)), &users))
            .collect(),
    };
    let json = serde_json::to_string_pretty(&fixture).context("serializing fixture")?;
    println!("{}", json);
    Ok(())
}
