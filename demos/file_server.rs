//! Serves files from the current directory with an access log on stderr.

use std::path::Path;

use ember_web::{AccessLog, Req, Server};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    println!("http://127.0.0.1:8080/<path>");

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .access_log(AccessLog::to_writer(Box::new(std::io::stderr())))
        .handler_fn(|req: &Req| {
            let path = req.path();
            let normalized = req.with_state(|s| {
                ember_web::util::normalize_path(&s.pool, path.as_slice())
            });
            let rel = format!(".{}", String::from_utf8_lossy(normalized.as_slice()));

            if req.send_file(200, "OK", Path::new(&rel), None).is_err() {
                req.send_error(404, "Not Found", "not found");
            }
        })
        .build()
        .launch()
        .await;
}
