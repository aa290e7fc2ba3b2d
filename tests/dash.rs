//! DASH origins served as HLS through the proxy.

use std::sync::Arc;

use axum::http::StatusCode;
use tokio::io::AsyncWriteExt;

mod common;

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// An origin answering every request with the same response.
async fn fixed_origin(status: &'static str, content_type: &'static str, body: impl Into<String>) -> common::MockOrigin {
    let body = Arc::new(body.into());
    common::start_origin(move |mut socket| {
        let body = Arc::clone(&body);
        async move {
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    })
    .await
}

/// Six seconds of two-second segments; init sections come from `init_origin`.
fn vod_mpd(media_origin: &common::MockOrigin, init_origin: &common::MockOrigin) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT6S">
  <Period>
    <BaseURL>{media}</BaseURL>
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1"
          initialization="{init}$RepresentationID$/init.mp4" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="v1" bandwidth="800000" width="640" height="360" codecs="avc1.4d401e"/>
    </AdaptationSet>
    <AdaptationSet mimeType="audio/mp4" lang="en">
      <SegmentTemplate timescale="1" duration="2" startNumber="1"
          initialization="{init}$RepresentationID$/init.mp4" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="a1" bandwidth="128000" codecs="mp4a.40.2"/>
    </AdaptationSet>
  </Period>
</MPD>"#,
        media = media_origin.url("/media/"),
        init = init_origin.url("/init/"),
    )
}

#[tokio::test]
async fn master_playlist_links_back_through_the_proxy() {
    let media = fixed_origin("200 OK", "video/mp4", "SEG").await;
    let init = fixed_origin("200 OK", "video/mp4", "INIT").await;
    let mpd = fixed_origin("200 OK", "application/dash+xml", vod_mpd(&media, &init)).await;
    let proxy = common::start_proxy(|_| {}).await;

    let mpd_url = mpd.url("/vod/stream.mpd");
    let query = format!("d={}&h_referer={}", encode(&mpd_url), encode("https://player.example/"));
    let res = common::client()
        .get(proxy.url(&format!("/proxy/mpd/manifest.m3u8?{query}")))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/vnd.apple.mpegurl");
    let body = res.text().await.unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines[0], "#EXTM3U");
    let audio = format!(
        "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"a1\",DEFAULT=YES,AUTOSELECT=YES,LANGUAGE=\"en\",URI=\"http://{}/proxy/mpd/playlist.m3u8?{query}&profile_id=a1\"",
        proxy.addr
    );
    assert!(lines.contains(&audio.as_str()), "{body}");
    assert!(lines.contains(
        &"#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401e\",AUDIO=\"audio\""
    ), "{body}");
    assert_eq!(
        *lines.last().unwrap(),
        format!("http://{}/proxy/mpd/playlist.m3u8?{query}&profile_id=v1", proxy.addr)
    );

    let head = mpd.last_head().to_ascii_lowercase();
    assert!(head.starts_with("get /vod/stream.mpd http/1.1"), "{head}");
    assert!(head.contains("referer: https://player.example/"), "{head}");
    assert_eq!(media.hits(), 0);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn media_playlist_segments_play_through_the_proxy() {
    let media = fixed_origin("200 OK", "video/iso.segment", "SEGMENT-BYTES").await;
    let init = fixed_origin("200 OK", "video/mp4", "INIT-").await;
    let mpd = fixed_origin("200 OK", "application/dash+xml", vod_mpd(&media, &init)).await;
    let proxy = common::start_proxy(|_| {}).await;

    let query = format!("d={}&profile_id=v1", encode(&mpd.url("/vod/stream.mpd")));
    let res = common::client()
        .get(proxy.url(&format!("/proxy/mpd/playlist.m3u8?{query}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().await.unwrap();

    assert!(body.contains("#EXT-X-TARGETDURATION:2"), "{body}");
    assert!(body.contains("#EXT-X-PLAYLIST-TYPE:VOD"), "{body}");
    assert!(body.trim_end().ends_with("#EXT-X-ENDLIST"), "{body}");
    let segments: Vec<&str> = body.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(segments.len(), 3, "{body}");
    let first = segments[0];
    assert!(first.starts_with(&format!("http://{}/proxy/mpd/segment.mp4?", proxy.addr)), "{first}");
    assert!(first.contains(&format!("segment_url={}", encode(&media.url("/media/v1/1.m4s")))), "{first}");
    assert!(first.contains(&format!("init_url={}", encode(&init.url("/init/v1/init.mp4")))), "{first}");
    assert!(first.contains("mime_type=video%2Fmp4"), "{first}");
    assert!(!first.contains("profile_id"), "{first}");

    let res = common::client().get(first).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "video/mp4");
    assert_eq!(res.headers()["content-length"], "18");
    assert_eq!(res.text().await.unwrap(), "INIT-SEGMENT-BYTES");

    assert!(init.last_head().starts_with("GET /init/v1/init.mp4 "), "{}", init.last_head());
    assert!(media.last_head().starts_with("GET /media/v1/1.m4s "), "{}", media.last_head());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn segment_without_init_is_relayed_alone() {
    let media = fixed_origin("200 OK", "application/octet-stream", "AUDIO-SEGMENT").await;
    let proxy = common::start_proxy(|_| {}).await;

    let query = format!(
        "segment_url={}&mime_type={}",
        encode(&media.url("/a1/7.m4s")),
        encode("audio/mp4")
    );
    let res = common::client()
        .get(proxy.url(&format!("/proxy/mpd/segment.mp4?{query}")))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "audio/mp4");
    assert_eq!(res.text().await.unwrap(), "AUDIO-SEGMENT");
    assert_eq!(media.hits(), 1);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn unknown_profile_is_not_found() {
    let media = fixed_origin("200 OK", "video/mp4", "SEG").await;
    let mpd = fixed_origin("200 OK", "application/dash+xml", vod_mpd(&media, &media)).await;
    let proxy = common::start_proxy(|_| {}).await;

    let query = format!("d={}&profile_id=v9", encode(&mpd.url("/stream.mpd")));
    let res = common::client()
        .get(proxy.url(&format!("/proxy/mpd/playlist.m3u8?{query}")))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    proxy.shutdown.trigger();
}

#[tokio::test]
async fn unusable_origins_are_bad_gateway() {
    let not_mpd = fixed_origin("200 OK", "text/html", "<html><body>nope</body></html>").await;
    let missing = fixed_origin("404 Not Found", "text/plain", "gone").await;
    let proxy = common::start_proxy(|_| {}).await;
    let client = common::client();

    let res = client
        .get(proxy.url(&format!("/proxy/mpd/manifest.m3u8?d={}", encode(&not_mpd.url("/x.mpd")))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let res = client
        .get(proxy.url(&format!("/proxy/mpd/manifest.m3u8?d={}", encode(&missing.url("/x.mpd")))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let res = client
        .get(proxy.url(&format!("/proxy/mpd/segment.mp4?segment_url={}", encode(&missing.url("/1.m4s")))))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    let res = client.get(proxy.url("/proxy/mpd/segment.mp4")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    proxy.shutdown.trigger();
}
