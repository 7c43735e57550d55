use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fulldump::format::message_text;
use fulldump::model::{Attachment, MessageKind, User};
use fulldump::{Message, MessageFormatter, OutputFormat, Snowflake};

// 4 March 2020 00:00:00 UTC
const DAY_START_MS: i64 = 1_583_280_000_000;

fn history(len: usize) -> Vec<Message> {
    (0..len)
        .map(|i| {
            // Roughly 40 messages per day.
            let ms = DAY_START_MS + i as i64 * 36 * 60 * 1000;
            Message {
                id: Snowflake::from_timestamp_ms(ms, i as u64),
                kind: if i % 50 == 0 {
                    MessageKind::ChannelPinnedMessage
                } else {
                    MessageKind::Default
                },
                author: Some(User {
                    id: Snowflake(i as u64 % 7 + 1),
                    username: format!("user{}", i % 7),
                    discriminator: Some("0001".to_string()),
                }),
                content: "Benchmarks measure the formatter on a realistic mix of chatter".to_string(),
                attachments: if i % 10 == 0 {
                    vec![Attachment {
                        url: format!("https://cdn.example.com/attachments/{}/image.png", i),
                    }]
                } else {
                    Vec::new()
                },
                mentions: Vec::new(),
                message_reference: None,
            }
        })
        .collect()
}

fn formatter_benchmark(c: &mut Criterion) {
    let messages = history(1_000);

    for format in [OutputFormat::Text, OutputFormat::Log, OutputFormat::Json] {
        c.bench_function(&format!("format_1000_messages_{}", format), |b| {
            b.iter(|| {
                let mut formatter = MessageFormatter::new(format);
                for message in &messages {
                    formatter.write(black_box(message)).unwrap();
                }
                black_box(formatter.flush().len());
            });
        });
    }
}

fn message_text_benchmark(c: &mut Criterion) {
    let messages = history(100);

    c.bench_function("message_text_100", |b| {
        b.iter(|| {
            for message in &messages {
                black_box(message_text(black_box(message)));
            }
        });
    });
}

criterion_group!(benches, formatter_benchmark, message_text_benchmark);
criterion_main!(benches);
