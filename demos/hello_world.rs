use ember_web::http::token;
use ember_web::{Req, Server};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    println!("http://127.0.0.1:8080/");

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler_fn(|req: &Req| {
            req.set_status(200, "OK");
            req.add_header(&token::CONTENT_TYPE, b"text/plain; charset=utf-8");
            req.send_inline(b"Hello world!\n");
        })
        .build()
        .launch()
        .await;
}
