//! End-to-end tests driving the capture pipeline through a live page.

use feed_capture::scheduler::TrackedElements;
use feed_capture::trackers::{dedup_key, DedupResult};
use feed_capture::{
    ActionKind, Actor, ButtonState, CaptureApp, CapturedAction, ChannelSink, Config, Confirmation,
    ConnectionRequestRecord, EventKind, MediaItemType, MediaType, Page, RecentCaptureCache, Tracker,
};
use pretty_assertions::assert_eq;
use scraper::Selector;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::LocalSet;
use tokio::time::Instant;

const NAV: &str = r#"<img class="global-nav__me-photo" alt="Ada Lovelace" src="https://media.example.com/ada.jpg">"#;

fn config() -> Config {
    let mut config = Config::default();
    config.destinations.post = Some("https://collector.example.com/posts".into());
    config.destinations.comment = Some("https://collector.example.com/comments".into());
    config.destinations.message = Some("https://collector.example.com/messages".into());
    config.destinations.connection_request = Some("https://collector.example.com/invites".into());
    config
}

fn start(url: &str, body: &str) -> (Rc<Page>, CaptureApp, UnboundedReceiver<CapturedAction>) {
    let source = format!("<html><body>{}{}</body></html>", NAV, body);
    let page = Rc::new(Page::new(url, &source));
    let (sink, rx) = ChannelSink::channel();
    let mut app = CaptureApp::new(config(), Rc::clone(&page), Rc::new(sink));
    app.init();
    (page, app, rx)
}

fn node(page: &Page, css: &str) -> ego_tree::NodeId {
    page.query_first(&Selector::parse(css).unwrap()).unwrap()
}

/// Let the scheduler and dispatcher process what is queued
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

const IMAGE_POST: &str = r#"<main>
  <div class="feed-shared-update-v2" data-urn="urn:li:activity:7001">
    <div class="update-components-actor">
      <span class="update-components-actor__title"><span aria-hidden="true">Jane Doe</span></span>
    </div>
    <div class="update-components-text">Launch day</div>
    <div class="update-components-image"><img class="update-components-image__image" src="https://media.example.com/launch.jpg"></div>
  </div>
</main>"#;

#[tokio::test(start_paused = true)]
async fn test_post_with_text_and_image_is_mixed() {
    LocalSet::new()
        .run_until(async {
            let (page, app, mut rx) = start("https://www.linkedin.com/feed/", IMAGE_POST);
            page.set_intersecting(node(&page, ".feed-shared-update-v2"), true);
            settle().await;

            let button = app.post_tracker().button_for("urn:li:activity:7001").unwrap();
            page.dispatch(EventKind::Click, button);

            let CapturedAction::Post(record) = rx.recv().await.unwrap() else {
                panic!("expected a post");
            };
            let kinds: Vec<MediaItemType> = record.content.iter().map(|c| c.item_type).collect();
            assert_eq!(kinds, vec![MediaItemType::Text, MediaItemType::Image]);
            assert_eq!(record.content[0].data, "Launch day");
            assert_eq!(record.content[1].data, "https://media.example.com/launch.jpg");
            assert_eq!(record.media_type, MediaType::Mixed);
            assert_eq!(record.actor.name, "Jane Doe");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_post_control_state_machine() {
    LocalSet::new()
        .run_until(async {
            let (page, app, mut rx) = start("https://www.linkedin.com/feed/", IMAGE_POST);
            page.set_intersecting(node(&page, ".feed-shared-update-v2"), true);
            settle().await;

            let posts = app.post_tracker();
            let id = "urn:li:activity:7001";
            let button = posts.button_for(id).unwrap();
            assert_eq!(page.text_of(button).as_deref(), Some("Capture"));

            assert_eq!(posts.capture(id).await.unwrap(), ButtonState::Success);
            assert_eq!(page.text_of(button).as_deref(), Some("Captured"));
            assert!(rx.recv().await.is_some());

            // Captured is sticky; a second click never re-delivers
            assert_eq!(posts.capture(id).await.unwrap(), ButtonState::Captured);
            assert_eq!(page.text_of(button).as_deref(), Some("Already captured"));
            settle().await;
            assert!(rx.try_recv().is_err());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_post_reported_once_while_visible() {
    LocalSet::new()
        .run_until(async {
            let (page, app, _rx) = start("https://www.linkedin.com/feed/", IMAGE_POST);
            let post = node(&page, ".feed-shared-update-v2");
            for _ in 0..3 {
                page.set_intersecting(post, true);
                settle().await;
            }
            assert_eq!(app.post_tracker().control_ids().len(), 1);
            let controls = Selector::parse("button.feed-capture-button").unwrap();
            assert_eq!(page.query_all(&controls).len(), 1);
        })
        .await;
}

const COMMENT_BOX: &str = r#"<div class="feed-shared-update-v2" data-urn="urn:li:activity:7">
  <div class="update-components-actor"><span class="update-components-actor__name">Grace Hopper</span></div>
  <div class="update-components-text">Nanoseconds explained</div>
  <div class="comments-comment-box">
    <form class="comments-comment-box__form">
      <div class="ql-editor" contenteditable="true"><p><br></p></div>
      <button class="comments-comment-box__submit-button" type="submit">Post</button>
    </form>
  </div>
  <div class="comments-comments-list"></div>
</div>"#;

#[tokio::test(start_paused = true)]
async fn test_empty_comment_is_not_captured() {
    LocalSet::new()
        .run_until(async {
            let (page, app, mut rx) = start("https://www.linkedin.com/feed/", COMMENT_BOX);
            settle().await;

            page.dispatch(EventKind::Click, node(&page, "button.comments-comment-box__submit-button"));
            tokio::time::sleep(Duration::from_secs(2)).await;

            assert!(rx.try_recv().is_err());
            let stats = app.comment_tracker().stats();
            assert_eq!(stats.captured, 0);
            assert_eq!(stats.failed, 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_comment_is_captured_end_to_end() {
    LocalSet::new()
        .run_until(async {
            let (page, _app, mut rx) = start("https://www.linkedin.com/feed/", COMMENT_BOX);
            settle().await;

            page.set_text(node(&page, ".ql-editor"), "Great explanation");
            page.dispatch(EventKind::Submit, node(&page, "form.comments-comment-box__form"));

            let CapturedAction::Comment(record) = rx.recv().await.unwrap() else {
                panic!("expected a comment");
            };
            assert_eq!(record.text, "Great explanation");
            assert_eq!(record.actor.name, "Ada Lovelace");
            assert_eq!(record.post_id.as_deref(), Some("urn:li:activity:7"));
        })
        .await;
}

const PLACEHOLDER_COMPOSER: &str = r#"<div class="msg-overlay-conversation-bubble" data-conversation-id="2-abc">
  <h2 class="msg-overlay-bubble-header__title"><a href="/in/jane-doe/">Jane Doe</a></h2>
  <ul class="msg-s-message-list-content"></ul>
  <form class="msg-form">
    <div class="msg-form__contenteditable" contenteditable="true"><p>Drag your file here. Select your file</p></div>
    <button class="msg-form__send-button" type="submit">Send</button>
  </form>
</div>"#;

#[tokio::test(start_paused = true)]
async fn test_placeholder_only_message_is_not_captured() {
    LocalSet::new()
        .run_until(async {
            let (page, _app, mut rx) = start("https://www.linkedin.com/messaging/thread/2-abc/", PLACEHOLDER_COMPOSER);
            settle().await;

            page.dispatch(EventKind::Click, node(&page, "button.msg-form__send-button"));
            tokio::time::sleep(Duration::from_secs(3)).await;
            assert!(rx.try_recv().is_err());
        })
        .await;
}

const SEARCH_RESULT: &str = r#"<div class="entity-result">
  <span class="entity-result__title-text"><a href="/in/jane-doe"><span aria-hidden="true">Jane Doe</span></a></span>
  <div class="entity-result__primary-subtitle">Staff Engineer at Acme Corp</div>
  <button aria-label="Invite Jane Doe to connect" class="artdeco-button">Connect</button>
</div>"#;

#[tokio::test(start_paused = true)]
async fn test_rapid_connect_clicks_deliver_once() {
    LocalSet::new()
        .run_until(async {
            let (page, _app, mut rx) = start("https://www.linkedin.com/search/results/people/", SEARCH_RESULT);
            settle().await;

            let button = node(&page, "button[aria-label^='Invite']");
            page.dispatch(EventKind::Click, button);
            tokio::time::sleep(Duration::from_millis(60)).await;
            page.dispatch(EventKind::Click, button);
            assert_eq!(page.listener_count(page.document_node(), EventKind::Click), 1);

            let CapturedAction::ConnectionRequest(record) = rx.recv().await.unwrap() else {
                panic!("expected a connection request");
            };
            assert_eq!(record.recipient.name, "Jane Doe");
            assert_eq!(record.actor.name, "Ada Lovelace");
            assert_eq!(record.confirmation, Confirmation::Unconfirmed);

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert!(rx.try_recv().is_err());
        })
        .await;
}

const SECOND_RESULT: &str = r#"<div class="entity-result">
  <span class="entity-result__title-text"><a href="/in/john-roe"><span aria-hidden="true">John Roe</span></a></span>
  <div class="entity-result__primary-subtitle">Designer at Globex</div>
  <button aria-label="Invite John Roe to connect" class="artdeco-button">Connect</button>
</div>
<div id="modals"></div>"#;

const NOTE_MODAL: &str = r#"<div class="artdeco-modal-overlay"><div class="artdeco-modal send-invite" role="dialog">
  <div class="artdeco-modal__content"><p>Personalize your invitation to <strong>Jane Doe</strong></p>
    <textarea id="custom-message" name="message">Loved your talk on compilers</textarea></div>
  <div class="artdeco-modal__actionbar"><button aria-label="Send invitation" class="artdeco-button--primary">Send</button></div>
</div></div>"#;

#[tokio::test(start_paused = true)]
async fn test_quick_modal_send_then_direct_connect() {
    LocalSet::new()
        .run_until(async {
            let body = format!("{}{}", SEARCH_RESULT, SECOND_RESULT);
            let (page, _app, mut rx) = start("https://www.linkedin.com/search/results/people/", &body);
            settle().await;

            page.dispatch(EventKind::Click, node(&page, "button[aria-label='Invite Jane Doe to connect']"));
            page.insert_html(node(&page, "#modals"), NOTE_MODAL);
            tokio::time::sleep(Duration::from_millis(500)).await;
            page.dispatch(EventKind::Click, node(&page, "button[aria-label='Send invitation']"));
            page.remove(node(&page, "div.artdeco-modal-overlay"));

            // The closed modal must not hold this one back
            page.dispatch(EventKind::Click, node(&page, "button[aria-label='Invite John Roe to connect']"));

            let mut records = Vec::new();
            for _ in 0..2 {
                let CapturedAction::ConnectionRequest(record) = rx.recv().await.unwrap() else {
                    panic!("expected a connection request");
                };
                records.push(record);
            }
            records.sort_by(|a, b| a.recipient.name.cmp(&b.recipient.name));

            assert_eq!(records[0].recipient.name, "Jane Doe");
            assert_eq!(
                records[0].recipient.profile_url.as_deref(),
                Some("https://www.linkedin.com/in/jane-doe")
            );
            assert_eq!(records[0].custom_message.as_deref(), Some("Loved your talk on compilers"));
            assert_eq!(records[1].recipient.name, "John Roe");
            assert_eq!(records[1].custom_message, None);

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert!(rx.try_recv().is_err());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_navigation_reattaches_listeners() {
    LocalSet::new()
        .run_until(async {
            let (page, _app, _rx) = start("https://www.linkedin.com/feed/", COMMENT_BOX);
            settle().await;
            let submit = node(&page, "button.comments-comment-box__submit-button");
            assert_eq!(page.listener_count(submit, EventKind::Click), 1);

            page.set_url("https://www.linkedin.com/feed/update/urn:li:activity:7/");
            // Next URL poll notices the change and tracking is reset
            tokio::time::sleep(Duration::from_millis(1100)).await;
            assert_eq!(page.listener_count(submit, EventKind::Click), 0);

            // The delayed navigation rescan attaches again, exactly once
            tokio::time::sleep(Duration::from_millis(600)).await;
            assert_eq!(page.listener_count(submit, EventKind::Click), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_makes_pending_timers_noops() {
    LocalSet::new()
        .run_until(async {
            let (page, mut app, mut rx) = start("https://www.linkedin.com/search/results/people/", SEARCH_RESULT);
            settle().await;

            page.dispatch(EventKind::Click, node(&page, "button[aria-label^='Invite']"));
            app.cleanup();
            assert_eq!(page.listener_count(page.document_node(), EventKind::Click), 0);

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert!(rx.try_recv().is_err());
            assert!(app.stats().iter().all(|s| s.captured == 0));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_kind_is_dropped() {
    LocalSet::new()
        .run_until(async {
            let source = format!("<html><body>{}{}</body></html>", NAV, SEARCH_RESULT);
            let page = Rc::new(Page::new("https://www.linkedin.com/search/results/people/", &source));
            let (sink, mut rx) = ChannelSink::channel();
            let mut config = config();
            config.destinations.connection_request = None;
            let mut app = CaptureApp::new(config, Rc::clone(&page), Rc::new(sink));
            app.init();
            settle().await;

            page.dispatch(EventKind::Click, node(&page, "button[aria-label^='Invite']"));
            tokio::time::sleep(Duration::from_secs(10)).await;
            assert!(rx.try_recv().is_err());
        })
        .await;
}

fn invitation(name: &str) -> CapturedAction {
    CapturedAction::ConnectionRequest(ConnectionRequestRecord {
        id: format!("invite-{}", name),
        actor: Actor::named("Ada Lovelace"),
        recipient: Actor::named(name),
        timestamp: chrono::Utc::now(),
        context: feed_capture::ActionContext::Search,
        custom_message: None,
        recipient_title: None,
        recipient_company: None,
        confirmation: Confirmation::Confirmed,
    })
}

#[test]
fn test_dedup_window_and_ttl() {
    let mut cache = RecentCaptureCache::with_defaults();
    let key = dedup_key(&invitation("Jane Doe"), 100);
    assert!(key.starts_with(ActionKind::ConnectionRequest.as_str()));

    let t0 = Instant::now();
    assert_eq!(cache.check_and_record(&key, t0), DedupResult::New);
    assert_eq!(
        cache.check_and_record(&key, t0 + Duration::from_millis(4999)),
        DedupResult::Duplicate
    );
    assert_eq!(
        cache.check_and_record(&key, t0 + Duration::from_secs(10 * 60 + 1)),
        DedupResult::New
    );

    let other = dedup_key(&invitation("John Roe"), 100);
    assert_eq!(
        cache.check_and_record(&other, t0 + Duration::from_secs(10 * 60 + 2)),
        DedupResult::New
    );
}

#[test]
fn test_eviction_drops_oldest_last_seen() {
    let mut tracked: TrackedElements<u32> = TrackedElements::with_defaults();
    let t0 = Instant::now();
    for i in 0..51u32 {
        tracked.observe(i, t0 + Duration::from_millis(u64::from(i) + 1));
    }
    // Node 0 is seen again, so node 1 is now the oldest
    tracked.observe(0, t0 + Duration::from_secs(1));

    let evicted = tracked.enforce_cap();
    assert_eq!(evicted, vec![1]);
    assert_eq!(tracked.len(), 50);
    assert!(tracked.contains(0));
}
