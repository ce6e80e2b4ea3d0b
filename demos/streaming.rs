//! Streams a counter through the chunked encoder, one chunk per `proceed`.

use ember_web::{Generator, Req, SendBuf, Server};
use tokio::net::TcpListener;

struct Counter {
    n: u32,
}

impl Generator for Counter {
    fn proceed(&mut self, req: &Req) {
        self.n += 1;
        if self.n > 10 {
            req.send(&[], true);
            return;
        }
        let line = req.with_state(|s| s.pool.format(format_args!("tick {}\n", self.n)));
        req.send(&[SendBuf::Shared(line)], false);
    }
}

#[tokio::main]
async fn main() {
    println!("http://127.0.0.1:8080/  (watch with `curl -N`)");

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler_fn(|req: &Req| {
            req.set_status(200, "OK");
            // Content length stays unknown, so the chunked filter engages.
            req.start_response(Box::new(Counter { n: 0 }));
            req.send(&[SendBuf::Static(b"starting\n")], false);
        })
        .build()
        .launch()
        .await;
}
