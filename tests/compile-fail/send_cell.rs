extern crate atomicrefbox;

use atomicrefbox::AtomicRefBox;
use std::cell::Cell;
use std::sync::Arc;

fn main() {
    let counter = Arc::new(Cell::new(0));
    let abox = AtomicRefBox::new(Some(counter.clone()));
    let handle = std::thread::spawn(move || {
        //~^ ERROR `Cell<i32>` cannot be shared between threads safely
        if let Some(value) = abox.load() {
            value.set(1);
        }
    });
    handle.join().unwrap();
    println!("Main Thread: {:?}", counter.get());
}
